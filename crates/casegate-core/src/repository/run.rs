//! Run store trait definition.
//!
//! Defines the storage interface for runs, the decision ledger and HITL
//! tickets. The infrastructure layer (casegate-infra) implements this trait
//! with SQLite persistence; [`super::memory::InMemoryRunStore`] implements it
//! in process.

use casegate_types::error::RepositoryError;
use casegate_types::ledger::LedgerEntry;
use casegate_types::run::{Run, RunPatch, RunStatus};
use casegate_types::ticket::{Ticket, TicketResolution};
use uuid::Uuid;

/// Everything one engine step persists, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub run_id: Uuid,
    /// Usually guarded with `expected_version`.
    pub patch: RunPatch,
    /// Appended in order; sequence numbers are assigned by the store.
    pub ledger: Vec<LedgerEntry>,
    /// Ticket to open after any resolution below is applied.
    pub open_ticket: Option<Ticket>,
    /// Ticket to close as part of this step.
    pub resolve_ticket: Option<(Uuid, TicketResolution)>,
}

impl TransitionCommit {
    pub fn new(run_id: Uuid, patch: RunPatch) -> Self {
        Self {
            run_id,
            patch,
            ledger: Vec::new(),
            open_ticket: None,
            resolve_ticket: None,
        }
    }
}

/// Repository trait for run persistence.
///
/// Covers three entity families:
/// - **Runs:** create, read and merge-patch run records.
/// - **Ledger:** append-only decision entries per run.
/// - **Tickets:** HITL tickets, at most one open per run.
///
/// Ledger `sequence` values are assigned by the store, and stored ledger
/// timestamps never decrease within a run. Uses native async fn in traits
/// (Rust 2024 edition, no async_trait macro).
pub trait RunStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a run in `created` for `subject_id`.
    fn create_run(
        &self,
        subject_id: &str,
    ) -> impl std::future::Future<Output = Result<Run, RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// Merge-patch a run. Unspecified fields are untouched; `updated_at` and
    /// `version` are bumped. `NotFound` for an unknown run, `Conflict` on a
    /// stale `expected_version`.
    fn merge_run(
        &self,
        run_id: &Uuid,
        patch: &RunPatch,
    ) -> impl std::future::Future<Output = Result<Run, RepositoryError>> + Send;

    /// List runs currently in `status`, oldest first.
    fn list_runs_by_status(
        &self,
        status: RunStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    /// Append one entry. Returns the stored entry (sequence assigned,
    /// timestamp possibly clamped).
    fn append_ledger_entry(
        &self,
        entry: &LedgerEntry,
    ) -> impl std::future::Future<Output = Result<LedgerEntry, RepositoryError>> + Send;

    /// All entries for a run, ordered by (timestamp, sequence) ascending.
    fn list_ledger_entries(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<LedgerEntry>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    /// Store a new open ticket. `Conflict` if the run already has one open.
    fn create_ticket(
        &self,
        ticket: &Ticket,
    ) -> impl std::future::Future<Output = Result<Uuid, RepositoryError>> + Send;

    /// Close a ticket. `NotFound` for an unknown ticket, `Conflict` if it is
    /// already resolved.
    fn resolve_ticket(
        &self,
        ticket_id: &Uuid,
        resolution: &TicketResolution,
    ) -> impl std::future::Future<Output = Result<Ticket, RepositoryError>> + Send;

    /// Get a ticket by its UUID.
    fn get_ticket(
        &self,
        ticket_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;

    /// Open tickets for a run, oldest first (empty if none).
    fn list_open_tickets(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Atomic step commit
    // -----------------------------------------------------------------------

    /// Apply a run patch, ledger entries and ticket changes together.
    ///
    /// Either everything is written or nothing is. A stale
    /// `expected_version` yields `Conflict`.
    fn commit(
        &self,
        commit: &TransitionCommit,
    ) -> impl std::future::Future<Output = Result<Run, RepositoryError>> + Send;
}
