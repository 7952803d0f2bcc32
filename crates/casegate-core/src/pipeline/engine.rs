//! The run state machine.
//!
//! `Engine::advance` reads the persisted run, executes the one step its
//! status calls for, and commits the new status, payload, ledger entries and
//! ticket changes in a single atomic store call. A run never moves more than
//! one edge per call, and a terminal or suspended run is never advanced.

use std::collections::HashSet;

use casegate_types::config::EngineConfig;
use casegate_types::error::{NamespaceViolation, RepositoryError, ValidationError};
use casegate_types::ledger::LedgerEntry;
use casegate_types::run::{
    PayloadFragment, PayloadNamespace, Run, RunPatch, RunStatus,
};
use casegate_types::ticket::{DecisionStatus, DecisionSubmission, Ticket};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::repository::run::{RunStore, TransitionCommit};
use crate::repository::subject::SubjectRepository;

use super::analysis::{BatterySizingStage, EnergyLoadStage};
use super::graph::{Guard, StageGraph, Via};
use super::ledger::DecisionLedger;
use super::qualification::Qualification;
use super::review::{ReviewError, ReviewGate};
use super::stage::{BoxStage, Stage, StageContext, StageError, StageKind};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned by engine operations.
///
/// Disqualification is not an error; it is a terminal run status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The operation is not legal in the run's current status. The run is
    /// left untouched.
    #[error("cannot {operation} run {run_id} in status '{status}'")]
    InvalidTransition {
        run_id: Uuid,
        status: RunStatus,
        operation: &'static str,
    },

    /// Another caller changed the run first; re-read and retry.
    #[error("run {0} was modified concurrently")]
    ConcurrentModification(Uuid),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("stage '{stage}' wrote outside its namespace: {source}")]
    NamespaceViolation {
        stage: String,
        source: NamespaceViolation,
    },

    #[error("run {run_id} cannot be qualified; profile is missing {}", .fields.join(", "))]
    IncompleteProfile { run_id: Uuid, fields: Vec<String> },

    #[error("stage '{stage}' failed: {source}")]
    Stage { stage: String, source: StageError },

    /// The pipeline definition handed to the builder is invalid.
    #[error("invalid pipeline: {0}")]
    Pipeline(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    fn run_not_found(run_id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "run",
            id: run_id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Marks a run as being driven by this engine; removed on drop.
struct InFlight<'a> {
    runs: &'a DashMap<Uuid, ()>,
    run_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Engine`] from injected stores, configuration and the
/// ordered list of analysis stages.
pub struct EngineBuilder<R: RunStore, S: SubjectRepository> {
    store: R,
    subjects: S,
    config: EngineConfig,
    analyses: Vec<BoxStage>,
}

impl<R: RunStore, S: SubjectRepository> EngineBuilder<R, S> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Append an analysis stage. Stages run in the order they are added.
    pub fn analysis<T: Stage + 'static>(mut self, stage: T) -> Self {
        self.analyses.push(BoxStage::new(stage));
        self
    }

    /// Append the built-in `energy_load` and `battery_sizing` stages.
    pub fn with_default_stages(self) -> Self {
        self.analysis(EnergyLoadStage).analysis(BatterySizingStage)
    }

    pub fn build(self) -> Result<Engine<R, S>, EngineError> {
        let mut names = HashSet::new();
        for stage in &self.analyses {
            let name = stage.name().to_string();
            if stage.kind() != StageKind::Analysis {
                return Err(EngineError::Pipeline(format!(
                    "stage '{name}' is a {} stage, not an analysis",
                    stage.kind()
                )));
            }
            if stage.namespace() != PayloadNamespace::Analysis(name.clone()) {
                return Err(EngineError::Pipeline(format!(
                    "analysis stage '{name}' must own namespace 'analyses.{name}', not '{}'",
                    stage.namespace()
                )));
            }
            if !names.insert(name.clone()) {
                return Err(EngineError::Pipeline(format!(
                    "duplicate analysis stage name '{name}'"
                )));
            }
        }

        let gate = ReviewGate::new(self.config.review.clone());
        let graph = StageGraph::new(self.analyses.len() as u32);

        let mut stages = Vec::with_capacity(self.analyses.len() + 2);
        stages.push(BoxStage::new(Qualification::new(
            self.config.qualification.clone(),
        )));
        stages.extend(self.analyses);
        stages.push(BoxStage::new(gate.clone()));

        tracing::debug!(
            analysis_stages = graph.analysis_count(),
            "pipeline engine built"
        );

        Ok(Engine {
            ledger: DecisionLedger::new(self.store),
            subjects: self.subjects,
            graph,
            stages,
            gate,
            in_flight: DashMap::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives runs through qualification, analysis and human review.
///
/// Generic over the run store and subject repository so the same engine
/// runs on SQLite or in memory. Store handles are injected by the caller.
pub struct Engine<R: RunStore, S: SubjectRepository> {
    ledger: DecisionLedger<R>,
    subjects: S,
    graph: StageGraph,
    /// Indexed by graph slot: qualification, analyses, review gate.
    stages: Vec<BoxStage>,
    gate: ReviewGate,
    /// Runs currently being driven by this engine instance.
    in_flight: DashMap<Uuid, ()>,
}

impl<R: RunStore, S: SubjectRepository> Engine<R, S> {
    pub fn builder(store: R, subjects: S) -> EngineBuilder<R, S> {
        EngineBuilder {
            store,
            subjects,
            config: EngineConfig::default(),
            analyses: Vec::new(),
        }
    }

    /// Engine with the built-in analysis stages.
    pub fn new(store: R, subjects: S, config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(store, subjects)
            .config(config)
            .with_default_stages()
            .build()
    }

    pub fn store(&self) -> &R {
        self.ledger.store()
    }

    pub fn subjects(&self) -> &S {
        &self.subjects
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create a run for `subject_id`, or re-enter `existing` if supplied.
    pub async fn start(
        &self,
        subject_id: &str,
        existing: Option<Uuid>,
    ) -> Result<Uuid, EngineError> {
        if let Some(run_id) = existing {
            let run = self.load_run(run_id).await?;
            if run.subject_id != subject_id {
                return Err(ValidationError::SubjectMismatch {
                    run_id: run_id.to_string(),
                    owner: run.subject_id,
                    requested: subject_id.to_string(),
                }
                .into());
            }
            tracing::debug!(run_id = %run_id, status = %run.status, "re-entering existing run");
            return Ok(run_id);
        }

        if self.subjects.get_subject(subject_id).await?.is_none() {
            return Err(EngineError::NotFound {
                kind: "subject",
                id: subject_id.to_string(),
            });
        }

        let run = self.store().create_run(subject_id).await?;
        tracing::info!(run_id = %run.id, subject_id, "run created");
        Ok(run.id)
    }

    /// Execute exactly one step and return the persisted run.
    ///
    /// A run in `pending_review` is returned unchanged. A terminal run yields
    /// `InvalidTransition` and is not modified.
    pub async fn advance(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let _guard = self.acquire(run_id)?;
        self.step(run_id).await
    }

    /// Advance until the run is terminal or waiting for review.
    pub async fn advance_until_blocked(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let _guard = self.acquire(run_id)?;
        loop {
            let run = self.step(run_id).await?;
            if run.status.is_terminal() || run.status.is_suspended() {
                return Ok(run);
            }
        }
    }

    /// Fold a reviewer decision into a suspended run.
    ///
    /// The submission is validated before anything is read or written.
    /// `revision_requested` increments `revision_count` and re-enters
    /// `routing`; the other decisions are terminal.
    pub async fn resume(
        &self,
        run_id: Uuid,
        submission: &DecisionSubmission,
        reviewer_id: &str,
    ) -> Result<Run, EngineError> {
        let decision = submission.validate()?;
        if reviewer_id.trim().is_empty() {
            return Err(ValidationError::EmptyReviewer.into());
        }

        let _guard = self.acquire(run_id)?;
        let run = self.load_run(run_id).await?;
        let invalid = || EngineError::InvalidTransition {
            run_id,
            status: run.status,
            operation: "resume",
        };
        if run.status != RunStatus::PendingReview {
            return Err(invalid());
        }

        let ticket = self
            .store()
            .list_open_tickets(&run_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(invalid)?;

        let now = Utc::now();
        let resolved = self
            .gate
            .resolve(
                &ticket,
                decision,
                submission.feedback_text.clone(),
                reviewer_id,
                now,
            )
            .map_err(|e| self.review_error(&run, e))?;

        let mut next = self
            .graph
            .next(run.status, Guard::Decision(decision))
            .ok_or_else(invalid)?;
        let mut revision_count = None;
        if next == RunStatus::RevisionRequested {
            next = self
                .graph
                .next(next, Guard::Always)
                .ok_or_else(invalid)?;
            revision_count = Some(run.revision_count + 1);
        }

        let mut payload = run.payload.clone();
        payload
            .apply(
                &PayloadNamespace::Decision,
                PayloadFragment::Decision(resolved.record),
            )
            .map_err(|source| EngineError::NamespaceViolation {
                stage: ReviewGate::NAME.to_string(),
                source,
            })?;

        let mut patch = RunPatch::expecting(run.version).status(next).payload(payload);
        patch.revision_count = revision_count;

        let mut commit = TransitionCommit::new(run_id, patch);
        commit
            .ledger
            .push(DecisionLedger::<R>::entry(run_id, reviewer_id, resolved.note, now));
        commit.resolve_ticket = Some((ticket.id, resolved.resolution));

        let updated = self.commit(commit).await?;
        tracing::info!(
            run_id = %run_id,
            ticket_id = %ticket.id,
            decision = %decision,
            reviewer_id,
            status = %updated.status,
            revision_count = updated.revision_count,
            "review decision applied"
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.load_run(run_id).await
    }

    /// The run's decision ledger in audit order.
    pub async fn ledger(&self, run_id: Uuid) -> Result<Vec<LedgerEntry>, EngineError> {
        self.load_run(run_id).await?;
        Ok(self.ledger.history(&run_id).await?)
    }

    pub async fn open_tickets(&self, run_id: Uuid) -> Result<Vec<Ticket>, EngineError> {
        self.load_run(run_id).await?;
        Ok(self.store().list_open_tickets(&run_id).await?)
    }

    /// Runs awaiting review, highest `priority_key` first. Ties keep the
    /// store's oldest-first order.
    pub async fn list_awaiting_review<K, F>(&self, priority_key: F) -> Result<Vec<Run>, EngineError>
    where
        K: PartialOrd,
        F: Fn(&Run) -> K,
    {
        let mut runs = self
            .store()
            .list_runs_by_status(RunStatus::PendingReview)
            .await?;
        runs.sort_by(|a, b| {
            priority_key(b)
                .partial_cmp(&priority_key(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(runs)
    }

    /// Runs awaiting review, most urgent first.
    pub async fn list_awaiting_review_by_urgency(&self) -> Result<Vec<Run>, EngineError> {
        self.list_awaiting_review(|run| run.payload.urgency_score().unwrap_or(0))
            .await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn acquire(&self, run_id: Uuid) -> Result<InFlight<'_>, EngineError> {
        match self.in_flight.entry(run_id) {
            Entry::Occupied(_) => {
                tracing::warn!(run_id = %run_id, "run is already being driven");
                Err(EngineError::ConcurrentModification(run_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    runs: &self.in_flight,
                    run_id,
                })
            }
        }
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.store()
            .get_run(&run_id)
            .await?
            .ok_or_else(|| EngineError::run_not_found(run_id))
    }

    async fn step(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let run = self.load_run(run_id).await?;

        if run.status.is_terminal() || run.disqualified {
            return Err(EngineError::InvalidTransition {
                run_id,
                status: run.status,
                operation: "advance",
            });
        }
        if run.status.is_suspended() {
            tracing::debug!(run_id = %run_id, "run is awaiting review; not advancing");
            return Ok(run);
        }

        match self.graph.via(run.status) {
            Some(Via::Intake) => self.intake(run).await,
            Some(Via::Stage(slot)) => self.execute_stage(run, slot).await,
            Some(Via::ReEntry) => self.re_enter(run).await,
            Some(Via::Resume) | None => Err(EngineError::InvalidTransition {
                run_id,
                status: run.status,
                operation: "advance",
            }),
        }
    }

    /// `created -> running`: load the subject's profile into the payload.
    async fn intake(&self, run: Run) -> Result<Run, EngineError> {
        let subject = self
            .subjects
            .get_subject(&run.subject_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "subject",
                id: run.subject_id.clone(),
            })?;

        let next = self.next_status(&run, Guard::Always)?;
        let mut payload = run.payload.clone();
        payload
            .apply(
                &PayloadNamespace::Profile,
                PayloadFragment::Profile(subject.profile),
            )
            .map_err(|source| EngineError::NamespaceViolation {
                stage: "intake".to_string(),
                source,
            })?;

        let patch = RunPatch::expecting(run.version).status(next).payload(payload);
        let updated = self.commit(TransitionCommit::new(run.id, patch)).await?;
        tracing::info!(run_id = %run.id, subject_id = %run.subject_id, "profile loaded");
        Ok(updated)
    }

    /// `revision_requested -> routing`.
    async fn re_enter(&self, run: Run) -> Result<Run, EngineError> {
        let next = self.next_status(&run, Guard::Always)?;
        let patch = RunPatch::expecting(run.version).status(next);
        let updated = self.commit(TransitionCommit::new(run.id, patch)).await?;
        tracing::info!(run_id = %run.id, revision_count = run.revision_count, "run re-entered routing");
        Ok(updated)
    }

    async fn execute_stage(&self, run: Run, slot: usize) -> Result<Run, EngineError> {
        let stage = self.stages.get(slot).ok_or_else(|| {
            EngineError::Pipeline(format!("no stage in slot {slot}"))
        })?;
        let name = stage.name().to_string();

        let open_tickets = if stage.kind() == StageKind::ReviewGate {
            self.store().list_open_tickets(&run.id).await?
        } else {
            Vec::new()
        };
        let ctx = self.context(&run, open_tickets);

        tracing::debug!(run_id = %run.id, stage = %name, status = %run.status, "executing stage");
        let output = match stage.execute(&ctx).await {
            Ok(output) => output,
            Err(StageError::Review(ReviewError::AlreadyPending(existing))) => {
                return self.reuse_ticket(run, &ctx, &existing).await;
            }
            Err(StageError::IncompleteProfile(fields)) => {
                tracing::warn!(run_id = %run.id, ?fields, "profile incomplete; run not qualified");
                return Err(EngineError::IncompleteProfile {
                    run_id: run.id,
                    fields,
                });
            }
            Err(source) => {
                return Err(EngineError::Stage {
                    stage: name,
                    source,
                });
            }
        };

        if output.ticket.is_some() && stage.kind() != StageKind::ReviewGate {
            return Err(EngineError::Stage {
                stage: name,
                source: StageError::Failed("only the review gate may open tickets".to_string()),
            });
        }

        let (outcome, disqualifier_reason) = match &output.fragment {
            PayloadFragment::Qualification(q) if q.qualified => (Guard::Qualified, None),
            PayloadFragment::Qualification(q) => (Guard::Disqualified, q.reason.clone()),
            _ => (Guard::Always, None),
        };
        let next = self.next_status(&run, outcome)?;

        let mut payload = run.payload.clone();
        payload
            .apply(&stage.namespace(), output.fragment)
            .map_err(|source| EngineError::NamespaceViolation {
                stage: name.clone(),
                source,
            })?;

        let mut patch = RunPatch::expecting(run.version).status(next).payload(payload);
        if outcome == Guard::Disqualified {
            patch.disqualified = Some(true);
            patch.disqualifier_reason = disqualifier_reason;
        }

        let now = Utc::now();
        let mut commit = TransitionCommit::new(run.id, patch);
        commit.ledger = output
            .notes
            .into_iter()
            .map(|note| DecisionLedger::<R>::entry(run.id, &name, note, now))
            .collect();
        commit.open_ticket = output.ticket;

        let updated = self.commit(commit).await?;
        tracing::info!(
            run_id = %run.id,
            stage = %name,
            from = %run.status,
            to = %updated.status,
            "stage completed"
        );
        Ok(updated)
    }

    /// The gate found an open ticket: point the run at it and suspend
    /// without opening another.
    async fn reuse_ticket(
        &self,
        run: Run,
        ctx: &StageContext,
        existing: &Ticket,
    ) -> Result<Run, EngineError> {
        let next = self.next_status(&run, Guard::Always)?;
        let mut payload = run.payload.clone();
        payload
            .apply(
                &PayloadNamespace::Review,
                PayloadFragment::Review(self.gate.reuse(ctx, existing)),
            )
            .map_err(|source| EngineError::NamespaceViolation {
                stage: ReviewGate::NAME.to_string(),
                source,
            })?;

        let patch = RunPatch::expecting(run.version).status(next).payload(payload);
        let updated = self.commit(TransitionCommit::new(run.id, patch)).await?;
        tracing::info!(
            run_id = %run.id,
            ticket_id = %existing.id,
            "review ticket already open; reusing it"
        );
        Ok(updated)
    }

    fn context(&self, run: &Run, open_tickets: Vec<Ticket>) -> StageContext {
        let feedback = run
            .payload
            .decision
            .as_ref()
            .filter(|d| d.status == DecisionStatus::RevisionRequested)
            .and_then(|d| d.feedback_text.clone());
        StageContext {
            run_id: run.id,
            subject_id: run.subject_id.clone(),
            revision_count: run.revision_count,
            payload: run.payload.clone(),
            feedback,
            open_tickets,
        }
    }

    fn next_status(&self, run: &Run, outcome: Guard) -> Result<RunStatus, EngineError> {
        self.graph
            .next(run.status, outcome)
            .ok_or(EngineError::InvalidTransition {
                run_id: run.id,
                status: run.status,
                operation: "advance",
            })
    }

    /// Maps a failed `ReviewGate::resolve`. An open ticket found while
    /// entering review never reaches here; `execute_stage` reuses it.
    fn review_error(&self, run: &Run, err: ReviewError) -> EngineError {
        tracing::debug!(run_id = %run.id, error = %err, "decision rejected by review gate");
        EngineError::InvalidTransition {
            run_id: run.id,
            status: run.status,
            operation: "resume",
        }
    }

    async fn commit(&self, commit: TransitionCommit) -> Result<Run, EngineError> {
        let run_id = commit.run_id;
        let run = self.store().commit(&commit).await.map_err(|e| match e {
            RepositoryError::Conflict(reason) => {
                tracing::warn!(run_id = %run_id, reason = %reason, "commit lost to a concurrent writer");
                EngineError::ConcurrentModification(run_id)
            }
            RepositoryError::NotFound => EngineError::run_not_found(run_id),
            other => EngineError::Repository(other),
        })?;
        tracing::debug!(
            run_id = %run_id,
            status = %run.status,
            version = run.version,
            ledger_entries = commit.ledger.len(),
            "checkpointed run"
        );
        Ok(run)
    }
}
