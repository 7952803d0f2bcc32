//! Run domain types.
//!
//! A [`Run`] is one durable execution of the pipeline for one subject. Its
//! [`RunPayload`] is split into namespaces, each written by exactly one stage
//! kind; [`RunPatch`] carries merge-patch updates with an optional
//! optimistic-lock version.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NamespaceViolation, RepositoryError};
use crate::ledger::Confidence;
use crate::subject::FacilityProfile;
use crate::ticket::DecisionStatus;

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Position of a run in the pipeline graph.
///
/// Serialized as snake_case strings; analysis slots are `analyzing_1`,
/// `analyzing_2`, ... (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RunStatus {
    Created,
    Running,
    Routing,
    Disqualified,
    /// Analysis slot `k` (1-based) has completed.
    Analyzing(u32),
    PendingReview,
    Approved,
    Rejected,
    RevisionRequested,
}

impl RunStatus {
    /// Terminal states accept no further `advance` or `resume`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Disqualified | RunStatus::Approved | RunStatus::Rejected
        )
    }

    /// The run is suspended waiting for a reviewer.
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunStatus::PendingReview)
    }
}

impl From<DecisionStatus> for RunStatus {
    fn from(decision: DecisionStatus) -> Self {
        match decision {
            DecisionStatus::Approved => RunStatus::Approved,
            DecisionStatus::Rejected => RunStatus::Rejected,
            DecisionStatus::RevisionRequested => RunStatus::RevisionRequested,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Created => write!(f, "created"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Routing => write!(f, "routing"),
            RunStatus::Disqualified => write!(f, "disqualified"),
            RunStatus::Analyzing(k) => write!(f, "analyzing_{k}"),
            RunStatus::PendingReview => write!(f, "pending_review"),
            RunStatus::Approved => write!(f, "approved"),
            RunStatus::Rejected => write!(f, "rejected"),
            RunStatus::RevisionRequested => write!(f, "revision_requested"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "running" => Ok(RunStatus::Running),
            "routing" => Ok(RunStatus::Routing),
            "disqualified" => Ok(RunStatus::Disqualified),
            "pending_review" => Ok(RunStatus::PendingReview),
            "approved" => Ok(RunStatus::Approved),
            "rejected" => Ok(RunStatus::Rejected),
            "revision_requested" => Ok(RunStatus::RevisionRequested),
            other => match other.strip_prefix("analyzing_").map(str::parse::<u32>) {
                Some(Ok(k)) if k >= 1 => Ok(RunStatus::Analyzing(k)),
                _ => Err(format!("invalid run status: '{other}'")),
            },
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.to_string()
    }
}

// ---------------------------------------------------------------------------
// Payload namespaces
// ---------------------------------------------------------------------------

/// Output of the qualification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationOutput {
    pub qualified: bool,
    /// Disqualification reason; `None` when qualified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Name of the threshold that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_check: Option<String>,
    /// Threshold fields that were absent from the profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Output of one analysis stage, stored under its stage name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub data: serde_json::Value,
    pub confidence: Confidence,
    pub rationale: String,
    pub completed_at: DateTime<Utc>,
}

/// Written by the review gate when it suspends the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub ticket_id: Uuid,
    /// Review priority, 1 (lowest) to 10.
    pub urgency_score: u8,
    pub opened_at: DateTime<Utc>,
}

/// The most recent reviewer decision folded into the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub status: DecisionStatus,
    pub reviewer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
    pub ticket_id: Uuid,
    pub decided_at: DateTime<Utc>,
}

/// Accumulated, typed case state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<FacilityProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualification: Option<QualificationOutput>,
    /// Keyed by analysis stage name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analyses: BTreeMap<String, AnalysisOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
}

/// The payload namespace a stage is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PayloadNamespace {
    Profile,
    Qualification,
    /// `analyses.<stage name>`.
    Analysis(String),
    Review,
    Decision,
}

impl fmt::Display for PayloadNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadNamespace::Profile => write!(f, "profile"),
            PayloadNamespace::Qualification => write!(f, "qualification"),
            PayloadNamespace::Analysis(name) => write!(f, "analyses.{name}"),
            PayloadNamespace::Review => write!(f, "review"),
            PayloadNamespace::Decision => write!(f, "decision"),
        }
    }
}

/// A namespaced value produced by one step.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadFragment {
    Profile(FacilityProfile),
    Qualification(QualificationOutput),
    Analysis {
        stage: String,
        output: AnalysisOutput,
    },
    Review(ReviewOutput),
    Decision(DecisionRecord),
}

impl PayloadFragment {
    /// The namespace this fragment belongs to.
    pub fn namespace(&self) -> PayloadNamespace {
        match self {
            PayloadFragment::Profile(_) => PayloadNamespace::Profile,
            PayloadFragment::Qualification(_) => PayloadNamespace::Qualification,
            PayloadFragment::Analysis { stage, .. } => PayloadNamespace::Analysis(stage.clone()),
            PayloadFragment::Review(_) => PayloadNamespace::Review,
            PayloadFragment::Decision(_) => PayloadNamespace::Decision,
        }
    }
}

impl RunPayload {
    /// Write `fragment` on behalf of the owner of `owner`.
    ///
    /// Fails without modifying the payload when the fragment belongs to a
    /// different namespace.
    pub fn apply(
        &mut self,
        owner: &PayloadNamespace,
        fragment: PayloadFragment,
    ) -> Result<(), NamespaceViolation> {
        let target = fragment.namespace();
        if &target != owner {
            return Err(NamespaceViolation {
                namespace: owner.to_string(),
                fragment: target.to_string(),
            });
        }

        match fragment {
            PayloadFragment::Profile(p) => self.profile = Some(p),
            PayloadFragment::Qualification(q) => self.qualification = Some(q),
            PayloadFragment::Analysis { stage, output } => {
                self.analyses.insert(stage, output);
            }
            PayloadFragment::Review(r) => self.review = Some(r),
            PayloadFragment::Decision(d) => self.decision = Some(d),
        }
        Ok(())
    }

    /// Urgency recorded by the review gate, if the run reached it.
    pub fn urgency_score(&self) -> Option<u8> {
        self.review.as_ref().map(|r| r.urgency_score)
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// One durable execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7, assigned by the store.
    pub id: Uuid,
    pub subject_id: String,
    pub status: RunStatus,
    pub payload: RunPayload,
    pub disqualified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disqualifier_reason: Option<String>,
    pub revision_count: u32,
    /// Optimistic-lock counter, bumped on every persisted mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// A fresh run in `created`.
    pub fn new(id: Uuid, subject_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            subject_id: subject_id.into(),
            status: RunStatus::Created,
            payload: RunPayload::default(),
            disqualified: false,
            disqualifier_reason: None,
            revision_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` into this run.
    ///
    /// Unspecified fields are untouched. The disqualification flag and its
    /// reason are write-once and `revision_count` never decreases; breaking
    /// either, or a stale `expected_version`, yields `Conflict` and leaves
    /// the run as it was.
    pub fn apply_patch(&mut self, patch: &RunPatch, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(expected) = patch.expected_version
            && expected != self.version
        {
            return Err(RepositoryError::Conflict(format!(
                "run {} is at version {}, expected {}",
                self.id, self.version, expected
            )));
        }
        if self.disqualified && patch.disqualified == Some(false) {
            return Err(RepositoryError::Conflict(format!(
                "run {} is disqualified; the flag cannot be cleared",
                self.id
            )));
        }
        if let (Some(current), Some(new)) = (&self.disqualifier_reason, &patch.disqualifier_reason)
            && current != new
        {
            return Err(RepositoryError::Conflict(format!(
                "run {} already has disqualifier reason '{current}'",
                self.id
            )));
        }
        if let Some(count) = patch.revision_count
            && count < self.revision_count
        {
            return Err(RepositoryError::Conflict(format!(
                "revision_count cannot decrease ({} -> {count})",
                self.revision_count
            )));
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(payload) = &patch.payload {
            self.payload = payload.clone();
        }
        if let Some(flag) = patch.disqualified {
            self.disqualified = flag;
        }
        if let Some(reason) = &patch.disqualifier_reason {
            self.disqualifier_reason = Some(reason.clone());
        }
        if let Some(count) = patch.revision_count {
            self.revision_count = count;
        }

        self.version += 1;
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = if now > self.updated_at { now } else { floor };
        Ok(())
    }
}

/// Partial update for a run. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RunPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disqualified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disqualifier_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_count: Option<u32>,
    /// Compare-and-swap guard: apply only if the stored version matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl RunPatch {
    /// An empty patch guarded by `version`.
    pub fn expecting(version: u64) -> Self {
        Self {
            expected_version: Some(version),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payload(mut self, payload: RunPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}
