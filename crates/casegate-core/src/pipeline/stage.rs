//! Stage abstraction and its object-safe wrapper.
//!
//! A [`Stage`] turns a read-only [`StageContext`] into a [`StageOutput`]: one
//! payload fragment in the stage's own namespace, the ledger notes describing
//! what it decided, and (for the review gate only) a ticket to open.
//!
//! `BoxStage` follows the same blanket-impl pattern as the other boxed
//! trait objects in this workspace:
//! 1. Define an object-safe `StageDyn` trait with boxed futures
//! 2. Blanket-impl `StageDyn` for all `T: Stage`
//! 3. `BoxStage` wraps `Box<dyn StageDyn>` and delegates

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use casegate_types::ledger::{Confidence, LedgerAction};
use casegate_types::run::{PayloadFragment, PayloadNamespace, RunPayload};
use casegate_types::ticket::Ticket;
use uuid::Uuid;

use super::review::ReviewError;

// ---------------------------------------------------------------------------
// Context and output
// ---------------------------------------------------------------------------

/// Read-only snapshot of a run handed to a stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,
    pub subject_id: String,
    pub revision_count: u32,
    pub payload: RunPayload,
    /// Feedback from the reviewer who last requested a revision.
    pub feedback: Option<String>,
    /// Tickets already open for this run (normally empty).
    pub open_tickets: Vec<Ticket>,
}

/// A ledger entry as described by a stage; the engine adds identity and
/// timing when committing it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerNote {
    pub action: LedgerAction,
    pub input_summary: String,
    pub output: serde_json::Value,
    pub confidence: Confidence,
    pub rationale: String,
}

/// What a stage produced.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub fragment: PayloadFragment,
    pub notes: Vec<LedgerNote>,
    /// Ticket to open. Only the review gate sets this.
    pub ticket: Option<Ticket>,
}

impl StageOutput {
    pub fn new(fragment: PayloadFragment, note: LedgerNote) -> Self {
        Self {
            fragment,
            notes: vec![note],
            ticket: None,
        }
    }
}

/// The closed set of stage variants the engine knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Qualification,
    Analysis,
    ReviewGate,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Qualification => write!(f, "qualification"),
            StageKind::Analysis => write!(f, "analysis"),
            StageKind::ReviewGate => write!(f, "review_gate"),
        }
    }
}

/// Errors a stage can return.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A required earlier output is absent from the payload.
    #[error("stage '{stage}' requires '{input}' which is not in the payload")]
    MissingInput { stage: String, input: String },

    /// The profile lacks threshold fields and the policy is `reject`.
    #[error("profile is missing required fields: {}", .0.join(", "))]
    IncompleteProfile(Vec<String>),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error("stage failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One unit of pipeline work.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Stage: Send + Sync {
    /// Stable name, used as ledger actor and (for analyses) payload key.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// The only payload namespace this stage may write.
    fn namespace(&self) -> PayloadNamespace;

    fn execute(
        &self,
        ctx: &StageContext,
    ) -> impl Future<Output = Result<StageOutput, StageError>> + Send;
}

/// Object-safe version of [`Stage`] with boxed futures.
pub trait StageDyn: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    fn namespace(&self) -> PayloadNamespace;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a StageContext,
    ) -> Pin<Box<dyn Future<Output = Result<StageOutput, StageError>> + Send + 'a>>;
}

/// Blanket implementation: any `Stage` automatically implements `StageDyn`.
impl<T: Stage> StageDyn for T {
    fn name(&self) -> &str {
        Stage::name(self)
    }

    fn kind(&self) -> StageKind {
        Stage::kind(self)
    }

    fn namespace(&self) -> PayloadNamespace {
        Stage::namespace(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a StageContext,
    ) -> Pin<Box<dyn Future<Output = Result<StageOutput, StageError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }
}

/// Type-erased stage, so the engine can hold a heterogeneous pipeline.
pub struct BoxStage {
    inner: Box<dyn StageDyn + Send + Sync>,
}

impl BoxStage {
    pub fn new<T: Stage + 'static>(stage: T) -> Self {
        Self {
            inner: Box::new(stage),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    pub fn namespace(&self) -> PayloadNamespace {
        self.inner.namespace()
    }

    pub async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.inner.execute_boxed(ctx).await
    }
}

impl fmt::Debug for BoxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxStage")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
