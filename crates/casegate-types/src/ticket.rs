//! HITL ticket and reviewer decision types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepositoryError, ValidationError};

/// Outcome a reviewer may choose for a suspended run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approved,
    Rejected,
    RevisionRequested,
}

impl DecisionStatus {
    /// The fixed option set offered on every review ticket.
    pub const ALL: [DecisionStatus; 3] = [
        DecisionStatus::Approved,
        DecisionStatus::Rejected,
        DecisionStatus::RevisionRequested,
    ];
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStatus::Approved => write!(f, "approved"),
            DecisionStatus::Rejected => write!(f, "rejected"),
            DecisionStatus::RevisionRequested => write!(f, "revision_requested"),
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approved" => Ok(DecisionStatus::Approved),
            "rejected" => Ok(DecisionStatus::Rejected),
            "revision_requested" => Ok(DecisionStatus::RevisionRequested),
            other => Err(ValidationError::DecisionStatus(other.to_string())),
        }
    }
}

/// Decision-submission contract consumed from the external API/tool layer.
///
/// `status` is kept as a raw string so that an out-of-range value surfaces
/// as a [`ValidationError`] rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionSubmission {
    /// One of `approved`, `rejected`, `revision_requested`.
    pub status: String,
    /// Free-text reviewer feedback, fed back to the pipeline on revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
}

impl DecisionSubmission {
    pub fn new(status: DecisionStatus, feedback_text: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            feedback_text,
        }
    }

    /// Parse the submitted status into the allowed set.
    pub fn validate(&self) -> Result<DecisionStatus, ValidationError> {
        self.status.parse()
    }
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Resolved,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Open => write!(f, "open"),
            TicketStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "resolved" => Ok(TicketStatus::Resolved),
            other => Err(format!("invalid ticket status: '{other}'")),
        }
    }
}

/// How a ticket was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketResolution {
    pub decision: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub reviewer_id: String,
    pub resolved_at: DateTime<Utc>,
}

/// A suspended-state record awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// UUIDv7 ticket ID.
    pub id: Uuid,
    /// Back-reference to the suspended run.
    pub run_id: Uuid,
    pub question: String,
    /// Snapshot of the payload relevant to the decision.
    pub context: serde_json::Value,
    pub options: Vec<DecisionStatus>,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<TicketResolution>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Build a new open ticket.
    pub fn open(
        id: Uuid,
        run_id: Uuid,
        question: impl Into<String>,
        context: serde_json::Value,
        options: Vec<DecisionStatus>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            run_id,
            question: question.into(),
            context,
            options,
            status: TicketStatus::Open,
            resolution: None,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open
    }

    /// Close the ticket. A ticket resolves exactly once, and only with one
    /// of its offered options.
    pub fn resolve(&mut self, resolution: TicketResolution) -> Result<(), RepositoryError> {
        if !self.is_open() {
            return Err(RepositoryError::Conflict(format!(
                "ticket {} is already resolved",
                self.id
            )));
        }
        if !self.options.contains(&resolution.decision) {
            return Err(RepositoryError::Conflict(format!(
                "decision '{}' is not an option on ticket {}",
                resolution.decision, self.id
            )));
        }
        self.status = TicketStatus::Resolved;
        self.resolution = Some(resolution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_ticket() -> Ticket {
        Ticket::open(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "Approve?",
            json!({"subject_id": "FAC-001"}),
            DecisionStatus::ALL.to_vec(),
            Utc::now(),
        )
    }

    fn resolution(decision: DecisionStatus) -> TicketResolution {
        TicketResolution {
            decision,
            notes: Some("looks good".to_string()),
            reviewer_id: "r1".to_string(),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_submission_validate_accepts_allowed_set() {
        for status in DecisionStatus::ALL {
            let sub = DecisionSubmission::new(status, None);
            assert_eq!(sub.validate().unwrap(), status);
        }
    }

    #[test]
    fn test_submission_validate_rejects_unknown_status() {
        let sub: DecisionSubmission =
            serde_json::from_value(json!({"status": "escalated"})).unwrap();
        assert_eq!(
            sub.validate(),
            Err(ValidationError::DecisionStatus("escalated".to_string()))
        );
    }

    #[test]
    fn test_resolve_closes_ticket_once() {
        let mut ticket = sample_ticket();
        ticket
            .resolve(resolution(DecisionStatus::Approved))
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Resolved);

        let again = ticket.resolve(resolution(DecisionStatus::Rejected));
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));
        assert_eq!(
            ticket.resolution.as_ref().unwrap().decision,
            DecisionStatus::Approved
        );
    }

    #[test]
    fn test_resolve_rejects_decision_outside_options() {
        let mut ticket = sample_ticket();
        ticket.options = vec![DecisionStatus::Approved];
        let result = ticket.resolve(resolution(DecisionStatus::Rejected));
        assert!(result.is_err());
        assert!(ticket.is_open());
    }

    #[test]
    fn test_decision_submission_schema_names_fields() {
        let schema = schemars::schema_for!(DecisionSubmission);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("feedback_text"));
    }
}
