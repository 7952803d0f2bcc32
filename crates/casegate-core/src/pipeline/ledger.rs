//! Append-only decision ledger over a [`RunStore`].
//!
//! Wraps the store to turn stage [`LedgerNote`]s into entries for a step
//! commit and to read a run's audit trail back. No update or delete is exposed.

use casegate_types::error::RepositoryError;
use casegate_types::ledger::LedgerEntry;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::repository::run::RunStore;

use super::stage::LedgerNote;

/// Generic over `R: RunStore` so it works with any storage backend.
pub struct DecisionLedger<R: RunStore> {
    store: R,
}

impl<R: RunStore> DecisionLedger<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Build an entry from a note. The sequence is assigned on append.
    pub fn entry(run_id: Uuid, actor: &str, note: LedgerNote, at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::now_v7(),
            run_id,
            sequence: 0,
            actor: actor.to_string(),
            action: note.action,
            input_summary: note.input_summary,
            output: note.output,
            confidence: note.confidence,
            rationale: note.rationale,
            timestamp: at,
        }
    }

    /// The run's audit trail, ordered by (timestamp, sequence).
    pub async fn history(
        &self,
        run_id: &Uuid,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        self.store.list_ledger_entries(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryRunStore;
    use casegate_types::ledger::{Confidence, LedgerAction};
    use serde_json::json;

    fn note(action: LedgerAction) -> LedgerNote {
        LedgerNote {
            action,
            input_summary: "summary".to_string(),
            output: json!({"ok": true}),
            confidence: Confidence::High,
            rationale: "because".to_string(),
        }
    }

    #[tokio::test]
    async fn test_history_in_append_order() {
        let store = InMemoryRunStore::new();
        let run = store.create_run("FAC-001").await.unwrap();
        let ledger = DecisionLedger::new(store);

        for (actor, action) in [
            ("qualification", LedgerAction::Qualified),
            ("energy_load", LedgerAction::Analyzed),
        ] {
            let entry =
                DecisionLedger::<InMemoryRunStore>::entry(run.id, actor, note(action), Utc::now());
            ledger.store().append_ledger_entry(&entry).await.unwrap();
        }

        let history = ledger.history(&run.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].actor, "qualification");
        assert_eq!(history[1].actor, "energy_load");
        assert!(history[0].sequence < history[1].sequence);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[test]
    fn test_entry_copies_note_and_leaves_sequence_unassigned() {
        let run_id = Uuid::now_v7();
        let at = Utc::now();
        let entry = DecisionLedger::<InMemoryRunStore>::entry(
            run_id,
            "reviewer-1",
            note(LedgerAction::ReviewDecision),
            at,
        );
        assert_eq!(entry.run_id, run_id);
        assert_eq!(entry.actor, "reviewer-1");
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.timestamp, at);
        assert_eq!(entry.rationale, "because");
    }

    #[tokio::test]
    async fn test_history_for_unknown_run_is_empty() {
        let ledger = DecisionLedger::new(InMemoryRunStore::new());
        let history = ledger.history(&Uuid::now_v7()).await.unwrap();
        assert!(history.is_empty());
    }
}
