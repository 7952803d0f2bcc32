//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod pool;
pub mod run;
pub mod subject;

use chrono::{DateTime, SubsecRound, Utc};
use casegate_types::error::RepositoryError;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 with microseconds, so text order is time order.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// SQLITE_BUSY or one of its extended codes (e.g. BUSY_SNAPSHOT, 517).
fn is_busy(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| code & 0xff == 5)
}

/// Another connection holding the write lock is a lost race, not a fault.
pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    if is_busy(&e) {
        return RepositoryError::Conflict(format!("database busy: {e}"));
    }
    RepositoryError::Query(e.to_string())
}

/// Map a UNIQUE violation to `Conflict`, anything else as `query_err`.
pub(crate) fn write_err(e: sqlx::Error, conflict: impl FnOnce() -> String) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.message().contains("UNIQUE")
    {
        return RepositoryError::Conflict(conflict());
    }
    query_err(e)
}

/// Open a write transaction that takes the database write lock up front,
/// so rows read inside it cannot go stale before the write.
pub(crate) async fn begin_write(
    pool: &SqlitePool,
) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
    pool.begin_with("BEGIN IMMEDIATE").await.map_err(query_err)
}

#[cfg(test)]
mod tests {
    use super::pool::DatabasePool;
    use super::{format_datetime, now, parse_datetime};
    use super::run::SqliteRunStore;
    use super::subject::SqliteSubjectRepository;
    use casegate_core::pipeline::engine::Engine;
    use casegate_core::repository::subject::SubjectRepository;
    use casegate_types::config::EngineConfig;
    use casegate_types::ledger::LedgerAction;
    use casegate_types::run::RunStatus;
    use casegate_types::ticket::{DecisionStatus, DecisionSubmission};
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    fn engine(pool: &DatabasePool) -> Engine<SqliteRunStore, SqliteSubjectRepository> {
        Engine::new(
            SqliteRunStore::new(pool.clone()),
            SqliteSubjectRepository::new(pool.clone()),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_format_datetime_round_trips_at_micros() {
        let at = now();
        assert_eq!(parse_datetime(&format_datetime(&at)).unwrap(), at);
        assert!(format_datetime(&at).ends_with('Z'));
    }

    #[tokio::test]
    async fn test_pipeline_survives_restart_on_sqlite() {
        let pool = test_pool().await;
        let first = engine(&pool);
        let patch = json!({
            "annual_operating_hours": 5800,
            "monthly_demand_charge": 8000,
            "facility_power_load": 500
        });
        first
            .subjects()
            .upsert_profile("FAC-001", patch.as_object().unwrap())
            .await
            .unwrap();

        let run_id = first.start("FAC-001", None).await.unwrap();
        let suspended = first.advance_until_blocked(run_id).await.unwrap();
        assert_eq!(suspended.status, RunStatus::PendingReview);
        drop(first);

        // A fresh engine over the same database picks the run up.
        let second = engine(&pool);
        let tickets = second.open_tickets(run_id).await.unwrap();
        assert_eq!(tickets.len(), 1);

        let decided = second
            .resume(
                run_id,
                &DecisionSubmission::new(DecisionStatus::Approved, None),
                "r1",
            )
            .await
            .unwrap();
        assert_eq!(decided.status, RunStatus::Approved);
        assert!(second.open_tickets(run_id).await.unwrap().is_empty());

        let ledger = second.ledger(run_id).await.unwrap();
        let actions: Vec<LedgerAction> = ledger.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                LedgerAction::Qualified,
                LedgerAction::Analyzed,
                LedgerAction::Analyzed,
                LedgerAction::ReviewRequested,
                LedgerAction::ReviewDecision,
            ]
        );
        assert_eq!(ledger.last().unwrap().actor, "r1");
    }

    #[tokio::test]
    async fn test_disqualified_run_on_sqlite() {
        let pool = test_pool().await;
        let engine = engine(&pool);
        let patch = json!({
            "annual_operating_hours": 50,
            "monthly_demand_charge": 8000,
            "facility_power_load": 500
        });
        engine
            .subjects()
            .upsert_profile("FAC-002", patch.as_object().unwrap())
            .await
            .unwrap();

        let run_id = engine.start("FAC-002", None).await.unwrap();
        let run = engine.advance_until_blocked(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Disqualified);
        assert!(run.disqualified);
        assert!(run.disqualifier_reason.unwrap().starts_with("Emergency-Only"));
        assert_eq!(engine.ledger(run_id).await.unwrap().len(), 1);
    }
}
