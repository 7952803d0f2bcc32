//! In-process implementation of [`RunStore`] and [`SubjectRepository`].
//!
//! All state lives behind one async mutex, so every operation (including
//! `commit`) is trivially atomic. Cloning the store shares the same state.

use std::collections::HashMap;
use std::sync::Arc;

use casegate_types::error::RepositoryError;
use casegate_types::ledger::LedgerEntry;
use casegate_types::run::{Run, RunPatch, RunStatus};
use casegate_types::subject::{FacilityProfile, Subject};
use casegate_types::ticket::{Ticket, TicketResolution};
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::run::{RunStore, TransitionCommit};
use super::subject::SubjectRepository;

#[derive(Debug, Default)]
struct State {
    runs: HashMap<Uuid, Run>,
    ledger: HashMap<Uuid, Vec<LedgerEntry>>,
    tickets: HashMap<Uuid, Ticket>,
    subjects: HashMap<String, Subject>,
}

impl State {
    /// Stamp `entry` with the next sequence for its run and clamp its
    /// timestamp to the last stored one.
    fn stage_entry(&self, entry: &LedgerEntry, pending: &[LedgerEntry]) -> LedgerEntry {
        let last = pending
            .last()
            .or_else(|| self.ledger.get(&entry.run_id).and_then(|v| v.last()));
        let mut stored = entry.clone();
        match last {
            Some(prev) => {
                stored.sequence = prev.sequence + 1;
                if stored.timestamp < prev.timestamp {
                    stored.timestamp = prev.timestamp;
                }
            }
            None => stored.sequence = 1,
        }
        stored
    }

    fn open_ticket_ids(&self, run_id: &Uuid) -> Vec<Uuid> {
        self.tickets
            .values()
            .filter(|t| &t.run_id == run_id && t.is_open())
            .map(|t| t.id)
            .collect()
    }
}

/// Shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    async fn create_run(&self, subject_id: &str) -> Result<Run, RepositoryError> {
        let run = Run::new(Uuid::now_v7(), subject_id, Utc::now());
        let mut state = self.state.lock().await;
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        Ok(self.state.lock().await.runs.get(run_id).cloned())
    }

    async fn merge_run(&self, run_id: &Uuid, patch: &RunPatch) -> Result<Run, RepositoryError> {
        let mut state = self.state.lock().await;
        let run = state.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        let mut updated = run.clone();
        updated.apply_patch(patch, Utc::now())?;
        *run = updated.clone();
        Ok(updated)
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<Run>, RepositoryError> {
        let state = self.state.lock().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerEntry, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.runs.contains_key(&entry.run_id) {
            return Err(RepositoryError::NotFound);
        }
        let stored = state.stage_entry(entry, &[]);
        state
            .ledger
            .entry(entry.run_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_ledger_entries(&self, run_id: &Uuid) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.lock().await;
        let mut entries = state.ledger.get(run_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        Ok(entries)
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<Uuid, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.runs.contains_key(&ticket.run_id) {
            return Err(RepositoryError::NotFound);
        }
        if !state.open_ticket_ids(&ticket.run_id).is_empty() {
            return Err(RepositoryError::Conflict(format!(
                "run {} already has an open ticket",
                ticket.run_id
            )));
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.id)
    }

    async fn resolve_ticket(
        &self,
        ticket_id: &Uuid,
        resolution: &TicketResolution,
    ) -> Result<Ticket, RepositoryError> {
        let mut state = self.state.lock().await;
        let ticket = state
            .tickets
            .get_mut(ticket_id)
            .ok_or(RepositoryError::NotFound)?;
        ticket.resolve(resolution.clone())?;
        Ok(ticket.clone())
    }

    async fn get_ticket(&self, ticket_id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.state.lock().await.tickets.get(ticket_id).cloned())
    }

    async fn list_open_tickets(&self, run_id: &Uuid) -> Result<Vec<Ticket>, RepositoryError> {
        let state = self.state.lock().await;
        let mut open: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| &t.run_id == run_id && t.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn commit(&self, commit: &TransitionCommit) -> Result<Run, RepositoryError> {
        let mut state = self.state.lock().await;

        // Stage every change on copies first; nothing is written until all
        // checks pass.
        let mut run = state
            .runs
            .get(&commit.run_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        run.apply_patch(&commit.patch, Utc::now())?;

        let resolved = match &commit.resolve_ticket {
            Some((ticket_id, resolution)) => {
                let mut ticket = state
                    .tickets
                    .get(ticket_id)
                    .cloned()
                    .ok_or(RepositoryError::NotFound)?;
                if ticket.run_id != commit.run_id {
                    return Err(RepositoryError::Conflict(format!(
                        "ticket {ticket_id} belongs to run {}",
                        ticket.run_id
                    )));
                }
                ticket.resolve(resolution.clone())?;
                Some(ticket)
            }
            None => None,
        };

        if let Some(ticket) = &commit.open_ticket {
            let still_open = state
                .open_ticket_ids(&commit.run_id)
                .into_iter()
                .filter(|id| resolved.as_ref().map(|t| t.id) != Some(*id))
                .count();
            if still_open > 0 || ticket.run_id != commit.run_id {
                return Err(RepositoryError::Conflict(format!(
                    "run {} already has an open ticket",
                    commit.run_id
                )));
            }
        }

        let mut staged: Vec<LedgerEntry> = Vec::with_capacity(commit.ledger.len());
        for entry in &commit.ledger {
            if entry.run_id != commit.run_id {
                return Err(RepositoryError::Conflict(format!(
                    "ledger entry {} is for run {}",
                    entry.id, entry.run_id
                )));
            }
            let stored = state.stage_entry(entry, &staged);
            staged.push(stored);
        }

        if let Some(ticket) = resolved {
            state.tickets.insert(ticket.id, ticket);
        }
        if let Some(ticket) = &commit.open_ticket {
            state.tickets.insert(ticket.id, ticket.clone());
        }
        state.ledger.entry(commit.run_id).or_default().extend(staged);
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }
}

impl SubjectRepository for InMemoryRunStore {
    async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, RepositoryError> {
        Ok(self.state.lock().await.subjects.get(subject_id).cloned())
    }

    async fn upsert_profile(
        &self,
        subject_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<Subject, RepositoryError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let subject = match state.subjects.get(subject_id) {
            Some(existing) => Subject {
                profile: existing
                    .profile
                    .merge_patch(patch)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                updated_at: now,
                ..existing.clone()
            },
            None => Subject {
                id: subject_id.to_string(),
                profile: FacilityProfile::default()
                    .merge_patch(patch)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                created_at: now,
                updated_at: now,
            },
        };
        state.subjects.insert(subject_id.to_string(), subject.clone());
        Ok(subject)
    }
}
