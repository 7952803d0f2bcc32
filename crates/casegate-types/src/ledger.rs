//! Decision ledger types.
//!
//! One immutable [`LedgerEntry`] is written per stage execution and per human
//! decision. Entries are append-only; their per-run order is the audit trail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How sure a stage (or reviewer) is about its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("invalid confidence: '{other}'")),
        }
    }
}

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    /// Qualification passed all thresholds.
    Qualified,
    /// Qualification failed a threshold; the run is terminal.
    Disqualified,
    /// An analysis stage produced its output.
    Analyzed,
    /// The review gate opened (or reused) a HITL ticket.
    ReviewRequested,
    /// A reviewer resolved the ticket.
    ReviewDecision,
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAction::Qualified => write!(f, "qualified"),
            LedgerAction::Disqualified => write!(f, "disqualified"),
            LedgerAction::Analyzed => write!(f, "analyzed"),
            LedgerAction::ReviewRequested => write!(f, "review_requested"),
            LedgerAction::ReviewDecision => write!(f, "review_decision"),
        }
    }
}

impl FromStr for LedgerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qualified" => Ok(LedgerAction::Qualified),
            "disqualified" => Ok(LedgerAction::Disqualified),
            "analyzed" => Ok(LedgerAction::Analyzed),
            "review_requested" => Ok(LedgerAction::ReviewRequested),
            "review_decision" => Ok(LedgerAction::ReviewDecision),
            other => Err(format!("invalid ledger action: '{other}'")),
        }
    }
}

/// One immutable audit record attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// UUIDv7 entry ID.
    pub id: Uuid,
    pub run_id: Uuid,
    /// Per-run position, assigned by the store on append (1-based).
    pub sequence: u64,
    /// Stage name or reviewer identity.
    pub actor: String,
    pub action: LedgerAction,
    pub input_summary: String,
    pub output: serde_json::Value,
    pub confidence: Confidence,
    pub rationale: String,
    /// Clamped by the store so that it never decreases within a run.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_roundtrip_str() {
        for c in [Confidence::Low, Confidence::Medium, Confidence::High] {
            assert_eq!(c.to_string().parse::<Confidence>().unwrap(), c);
        }
        assert!("certain".parse::<Confidence>().is_err());
    }

    #[test]
    fn test_ledger_action_matches_serde_names() {
        for action in [
            LedgerAction::Qualified,
            LedgerAction::Disqualified,
            LedgerAction::Analyzed,
            LedgerAction::ReviewRequested,
            LedgerAction::ReviewDecision,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json.as_str().unwrap(), action.to_string());
            assert_eq!(action.to_string().parse::<LedgerAction>().unwrap(), action);
        }
    }
}
