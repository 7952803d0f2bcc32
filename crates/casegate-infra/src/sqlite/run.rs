//! SQLite run store implementation.
//!
//! Implements `RunStore` from `casegate-core` using sqlx with split
//! read/write pools. Run payloads, ticket contexts and resolutions are stored
//! as JSON text. Every `commit` is a single writer transaction guarded by the
//! run's `version` column.

use casegate_core::repository::run::{RunStore, TransitionCommit};
use casegate_types::error::RepositoryError;
use casegate_types::ledger::LedgerEntry;
use casegate_types::run::{Run, RunPatch, RunPayload, RunStatus};
use casegate_types::ticket::{DecisionStatus, Ticket, TicketResolution, TicketStatus};
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{begin_write, format_datetime, now, parse_datetime, parse_uuid, query_err, write_err};

/// SQLite-backed implementation of `RunStore`.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: DatabasePool,
}

impl SqliteRunStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    subject_id: String,
    status: String,
    payload: String,
    disqualified: bool,
    disqualifier_reason: Option<String>,
    revision_count: i64,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            disqualified: row.try_get("disqualified")?,
            disqualifier_reason: row.try_get("disqualifier_reason")?,
            revision_count: row.try_get("revision_count")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let status: RunStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let payload: RunPayload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid payload JSON: {e}")))?;

        Ok(Run {
            id: parse_uuid(&self.id)?,
            subject_id: self.subject_id,
            status,
            payload,
            disqualified: self.disqualified,
            disqualifier_reason: self.disqualifier_reason,
            revision_count: self.revision_count as u32,
            version: self.version as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct LedgerRow {
    id: String,
    run_id: String,
    sequence: i64,
    actor: String,
    action: String,
    input_summary: String,
    output: String,
    confidence: String,
    rationale: String,
    timestamp: String,
}

impl LedgerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            sequence: row.try_get("sequence")?,
            actor: row.try_get("actor")?,
            action: row.try_get("action")?,
            input_summary: row.try_get("input_summary")?,
            output: row.try_get("output")?,
            confidence: row.try_get("confidence")?,
            rationale: row.try_get("rationale")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, RepositoryError> {
        Ok(LedgerEntry {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            sequence: self.sequence as u64,
            actor: self.actor,
            action: self.action.parse().map_err(RepositoryError::Query)?,
            input_summary: self.input_summary,
            output: serde_json::from_str(&self.output)
                .map_err(|e| RepositoryError::Query(format!("invalid ledger output JSON: {e}")))?,
            confidence: self.confidence.parse().map_err(RepositoryError::Query)?,
            rationale: self.rationale,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

struct TicketRow {
    id: String,
    run_id: String,
    question: String,
    context: String,
    options: String,
    status: String,
    resolution: Option<String>,
    created_at: String,
}

impl TicketRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            question: row.try_get("question")?,
            context: row.try_get("context")?,
            options: row.try_get("options")?,
            status: row.try_get("status")?,
            resolution: row.try_get("resolution")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_ticket(self) -> Result<Ticket, RepositoryError> {
        let options: Vec<DecisionStatus> = serde_json::from_str(&self.options)
            .map_err(|e| RepositoryError::Query(format!("invalid ticket options JSON: {e}")))?;
        let resolution: Option<TicketResolution> = self
            .resolution
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid resolution JSON: {e}")))
            })
            .transpose()?;

        Ok(Ticket {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            question: self.question,
            context: serde_json::from_str(&self.context)
                .map_err(|e| RepositoryError::Query(format!("invalid ticket context JSON: {e}")))?,
            options,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            resolution,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// Statements shared by the single-operation methods and `commit`
// ---------------------------------------------------------------------------

async fn fetch_run(conn: &mut SqliteConnection, run_id: &Uuid) -> Result<Run, RepositoryError> {
    let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?
        .ok_or(RepositoryError::NotFound)?;
    RunRow::from_row(&row).map_err(query_err)?.into_run()
}

/// Write `run` back if the stored version is still `previous_version`.
async fn update_run(
    conn: &mut SqliteConnection,
    run: &Run,
    previous_version: u64,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        r#"UPDATE runs
           SET status = ?, payload = ?, disqualified = ?, disqualifier_reason = ?,
               revision_count = ?, version = ?, updated_at = ?
           WHERE id = ? AND version = ?"#,
    )
    .bind(run.status.to_string())
    .bind(to_json(&run.payload)?)
    .bind(run.disqualified)
    .bind(&run.disqualifier_reason)
    .bind(run.revision_count as i64)
    .bind(run.version as i64)
    .bind(format_datetime(&run.updated_at))
    .bind(run.id.to_string())
    .bind(previous_version as i64)
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "run {} changed concurrently (expected version {previous_version})",
            run.id
        )));
    }
    Ok(())
}

/// Apply `patch` to the stored run inside the caller's transaction.
async fn patch_run(
    conn: &mut SqliteConnection,
    run_id: &Uuid,
    patch: &RunPatch,
) -> Result<Run, RepositoryError> {
    let mut run = fetch_run(conn, run_id).await?;
    let previous_version = run.version;
    run.apply_patch(patch, now())?;
    update_run(conn, &run, previous_version).await?;
    Ok(run)
}

async fn fetch_ticket(
    conn: &mut SqliteConnection,
    ticket_id: &Uuid,
) -> Result<Option<Ticket>, RepositoryError> {
    let row = sqlx::query("SELECT * FROM hitl_tickets WHERE id = ?")
        .bind(ticket_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;
    match row {
        Some(row) => Ok(Some(TicketRow::from_row(&row).map_err(query_err)?.into_ticket()?)),
        None => Ok(None),
    }
}

async fn insert_ticket(conn: &mut SqliteConnection, ticket: &Ticket) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO hitl_tickets (id, run_id, question, context, options, status, resolution, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(ticket.id.to_string())
    .bind(ticket.run_id.to_string())
    .bind(&ticket.question)
    .bind(to_json(&ticket.context)?)
    .bind(to_json(&ticket.options)?)
    .bind(ticket.status.to_string())
    .bind(ticket.resolution.as_ref().map(to_json).transpose()?)
    .bind(format_datetime(&ticket.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        write_err(e, || format!("run {} already has an open ticket", ticket.run_id))
    })?;
    Ok(())
}

/// Close an open ticket. Validation happens on the domain type first.
async fn close_ticket(
    conn: &mut SqliteConnection,
    ticket_id: &Uuid,
    resolution: &TicketResolution,
) -> Result<Ticket, RepositoryError> {
    let mut ticket = fetch_ticket(conn, ticket_id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    ticket.resolve(resolution.clone())?;

    let result = sqlx::query(
        r#"UPDATE hitl_tickets SET status = ?, resolution = ?, resolved_at = ?
           WHERE id = ? AND status = 'open'"#,
    )
    .bind(TicketStatus::Resolved.to_string())
    .bind(to_json(resolution)?)
    .bind(format_datetime(&resolution.resolved_at))
    .bind(ticket_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "ticket {ticket_id} is already resolved"
        )));
    }
    Ok(ticket)
}

/// Append entries for one run, assigning sequences and clamping timestamps
/// to the last stored entry.
async fn append_entries(
    conn: &mut SqliteConnection,
    run_id: &Uuid,
    entries: &[LedgerEntry],
) -> Result<Vec<LedgerEntry>, RepositoryError> {
    let last = sqlx::query(
        "SELECT sequence, timestamp FROM ledger_entries WHERE run_id = ? ORDER BY sequence DESC LIMIT 1",
    )
    .bind(run_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(query_err)?;

    let mut previous: Option<(u64, DateTime<Utc>)> = match last {
        Some(row) => {
            let sequence: i64 = row.try_get("sequence").map_err(query_err)?;
            let timestamp: String = row.try_get("timestamp").map_err(query_err)?;
            Some((sequence as u64, parse_datetime(&timestamp)?))
        }
        None => None,
    };

    let mut stored = Vec::with_capacity(entries.len());
    for entry in entries {
        if &entry.run_id != run_id {
            return Err(RepositoryError::Conflict(format!(
                "ledger entry {} is for run {}",
                entry.id, entry.run_id
            )));
        }
        let mut staged = entry.clone();
        staged.timestamp = entry.timestamp.trunc_subsecs(6);
        match previous {
            Some((sequence, timestamp)) => {
                staged.sequence = sequence + 1;
                if staged.timestamp < timestamp {
                    staged.timestamp = timestamp;
                }
            }
            None => staged.sequence = 1,
        }

        sqlx::query(
            r#"INSERT INTO ledger_entries
               (id, run_id, sequence, actor, action, input_summary, output, confidence, rationale, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(staged.id.to_string())
        .bind(staged.run_id.to_string())
        .bind(staged.sequence as i64)
        .bind(&staged.actor)
        .bind(staged.action.to_string())
        .bind(&staged.input_summary)
        .bind(to_json(&staged.output)?)
        .bind(staged.confidence.to_string())
        .bind(&staged.rationale)
        .bind(format_datetime(&staged.timestamp))
        .execute(&mut *conn)
        .await
        .map_err(|e| write_err(e, || format!("ledger sequence taken for run {run_id}")))?;

        previous = Some((staged.sequence, staged.timestamp));
        stored.push(staged);
    }
    Ok(stored)
}

async fn ensure_run_exists(conn: &mut SqliteConnection, run_id: &Uuid) -> Result<(), RepositoryError> {
    let found = sqlx::query("SELECT 1 FROM runs WHERE id = ?")
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;
    found.map(|_| ()).ok_or(RepositoryError::NotFound)
}

impl RunStore for SqliteRunStore {
    async fn create_run(&self, subject_id: &str) -> Result<Run, RepositoryError> {
        let run = Run::new(Uuid::now_v7(), subject_id, now());

        sqlx::query(
            r#"INSERT INTO runs (id, subject_id, status, payload, disqualified, disqualifier_reason,
                                 revision_count, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.subject_id)
        .bind(run.status.to_string())
        .bind(to_json(&run.payload)?)
        .bind(run.disqualified)
        .bind(&run.disqualifier_reason)
        .bind(run.revision_count as i64)
        .bind(run.version as i64)
        .bind(format_datetime(&run.created_at))
        .bind(format_datetime(&run.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_err(e, || format!("run {} already exists", run.id)))?;

        tracing::debug!(run_id = %run.id, subject_id, "run created");
        Ok(run)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(RunRow::from_row(&row).map_err(query_err)?.into_run()?)),
            None => Ok(None),
        }
    }

    async fn merge_run(&self, run_id: &Uuid, patch: &RunPatch) -> Result<Run, RepositoryError> {
        let mut tx = begin_write(&self.pool.writer).await?;
        let run = patch_run(&mut tx, run_id, patch).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(run)
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM runs WHERE status = ? ORDER BY created_at ASC, id ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| RunRow::from_row(row).map_err(query_err)?.into_run())
            .collect()
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerEntry, RepositoryError> {
        let mut tx = begin_write(&self.pool.writer).await?;
        ensure_run_exists(&mut tx, &entry.run_id).await?;
        let mut stored = append_entries(&mut tx, &entry.run_id, std::slice::from_ref(entry)).await?;
        tx.commit().await.map_err(query_err)?;
        stored.pop().ok_or(RepositoryError::NotFound)
    }

    async fn list_ledger_entries(&self, run_id: &Uuid) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE run_id = ? ORDER BY timestamp ASC, sequence ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| LedgerRow::from_row(row).map_err(query_err)?.into_entry())
            .collect()
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<Uuid, RepositoryError> {
        let mut tx = begin_write(&self.pool.writer).await?;
        ensure_run_exists(&mut tx, &ticket.run_id).await?;
        insert_ticket(&mut tx, ticket).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(ticket.id)
    }

    async fn resolve_ticket(
        &self,
        ticket_id: &Uuid,
        resolution: &TicketResolution,
    ) -> Result<Ticket, RepositoryError> {
        let mut tx = begin_write(&self.pool.writer).await?;
        let ticket = close_ticket(&mut tx, ticket_id, resolution).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(ticket)
    }

    async fn get_ticket(&self, ticket_id: &Uuid) -> Result<Option<Ticket>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(query_err)?;
        fetch_ticket(&mut conn, ticket_id).await
    }

    async fn list_open_tickets(&self, run_id: &Uuid) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM hitl_tickets WHERE run_id = ? AND status = 'open' ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| TicketRow::from_row(row).map_err(query_err)?.into_ticket())
            .collect()
    }

    async fn commit(&self, commit: &TransitionCommit) -> Result<Run, RepositoryError> {
        // Dropping `tx` on any early return rolls the whole step back.
        let mut tx = begin_write(&self.pool.writer).await?;

        let run = patch_run(&mut tx, &commit.run_id, &commit.patch).await?;

        if let Some((ticket_id, resolution)) = &commit.resolve_ticket {
            let ticket = fetch_ticket(&mut tx, ticket_id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            if ticket.run_id != commit.run_id {
                return Err(RepositoryError::Conflict(format!(
                    "ticket {ticket_id} belongs to run {}",
                    ticket.run_id
                )));
            }
            close_ticket(&mut tx, ticket_id, resolution).await?;
        }

        if let Some(ticket) = &commit.open_ticket {
            if ticket.run_id != commit.run_id {
                return Err(RepositoryError::Conflict(format!(
                    "ticket {} is for run {}",
                    ticket.id, ticket.run_id
                )));
            }
            insert_ticket(&mut tx, ticket).await?;
        }

        let entries = append_entries(&mut tx, &commit.run_id, &commit.ledger).await?;

        tx.commit().await.map_err(query_err)?;
        tracing::debug!(
            run_id = %run.id,
            status = %run.status,
            version = run.version,
            entries = entries.len(),
            "run step committed"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegate_types::ledger::{Confidence, LedgerAction};
    use chrono::Duration;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        // Keep the tempdir alive for the test's duration.
        std::mem::forget(dir);
        pool
    }

    fn entry(run_id: Uuid, actor: &str, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::now_v7(),
            run_id,
            sequence: 0,
            actor: actor.to_string(),
            action: LedgerAction::Analyzed,
            input_summary: "test".to_string(),
            output: json!({"k": 1}),
            confidence: Confidence::Low,
            rationale: "test".to_string(),
            timestamp,
        }
    }

    fn ticket(run_id: Uuid) -> Ticket {
        Ticket::open(
            Uuid::now_v7(),
            run_id,
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

    #[tokio::test]
    async fn test_create_and_get_run() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();

        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched, run);
        assert_eq!(fetched.status, RunStatus::Created);
        assert!(store.get_run(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_run_round_trip() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();

        let patch = RunPatch {
            status: Some(RunStatus::Analyzing(2)),
            revision_count: Some(2),
            ..Default::default()
        };
        let merged = store.merge_run(&run.id, &patch).await.unwrap();
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();

        assert_eq!(fetched, merged);
        assert_eq!(fetched.status, RunStatus::Analyzing(2));
        assert_eq!(fetched.revision_count, 2);
        assert_eq!(fetched.version, 1);
        assert!(fetched.updated_at > run.updated_at);
    }

    #[tokio::test]
    async fn test_merge_unknown_run_is_not_found() {
        let store = SqliteRunStore::new(test_pool().await);
        let result = store.merge_run(&Uuid::now_v7(), &RunPatch::default()).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_merge_rejects_clearing_disqualification() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();
        let patch = RunPatch {
            status: Some(RunStatus::Disqualified),
            disqualified: Some(true),
            disqualifier_reason: Some("Emergency-Only".to_string()),
            ..Default::default()
        };
        store.merge_run(&run.id, &patch).await.unwrap();

        let clear = RunPatch {
            disqualified: Some(false),
            ..Default::default()
        };
        let result = store.merge_run(&run.id, &clear).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert!(store.get_run(&run.id).await.unwrap().unwrap().disqualified);
    }

    #[tokio::test]
    async fn test_list_runs_by_status() {
        let store = SqliteRunStore::new(test_pool().await);
        let first = store.create_run("FAC-001").await.unwrap();
        let second = store.create_run("FAC-002").await.unwrap();
        store.create_run("FAC-003").await.unwrap();

        for run in [&first, &second] {
            store
                .merge_run(&run.id, &RunPatch::default().status(RunStatus::PendingReview))
                .await
                .unwrap();
        }

        let pending = store.list_runs_by_status(RunStatus::PendingReview).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_ledger_sequence_and_clamp() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();
        let now = Utc::now();

        let first = store.append_ledger_entry(&entry(run.id, "a", now)).await.unwrap();
        let second = store
            .append_ledger_entry(&entry(run.id, "b", now - Duration::seconds(30)))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.timestamp, first.timestamp);

        let listed = store.list_ledger_entries(&run.id).await.unwrap();
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn test_ledger_for_unknown_run_is_not_found() {
        let store = SqliteRunStore::new(test_pool().await);
        let result = store
            .append_ledger_entry(&entry(Uuid::now_v7(), "a", Utc::now()))
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_ledger_rows_cannot_be_changed() {
        let pool = test_pool().await;
        let store = SqliteRunStore::new(pool.clone());
        let run = store.create_run("FAC-001").await.unwrap();
        store
            .append_ledger_entry(&entry(run.id, "a", Utc::now()))
            .await
            .unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET rationale = 'edited'")
            .execute(&pool.writer)
            .await;
        assert!(update.unwrap_err().to_string().contains("append-only"));

        let delete = sqlx::query("DELETE FROM ledger_entries")
            .execute(&pool.writer)
            .await;
        assert!(delete.unwrap_err().to_string().contains("append-only"));

        assert_eq!(store.list_ledger_entries(&run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_open_ticket_per_run() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();

        let first = ticket(run.id);
        store.create_ticket(&first).await.unwrap();
        let second = store.create_ticket(&ticket(run.id)).await;
        assert!(matches!(second, Err(RepositoryError::Conflict(_))));

        let open = store.list_open_tickets(&run.id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, first.id);
        assert_eq!(open[0].context, first.context);
        assert_eq!(open[0].options, first.options);
    }

    #[tokio::test]
    async fn test_resolve_ticket_once() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();
        let open = ticket(run.id);
        store.create_ticket(&open).await.unwrap();

        let resolved = store
            .resolve_ticket(&open.id, &resolution(DecisionStatus::Approved))
            .await
            .unwrap();
        assert_eq!(resolved.status, TicketStatus::Resolved);

        let fetched = store.get_ticket(&open.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TicketStatus::Resolved);
        let stored = fetched.resolution.unwrap();
        assert_eq!(stored.decision, DecisionStatus::Approved);
        assert_eq!(stored.reviewer_id, "r1");
        assert!(store.list_open_tickets(&run.id).await.unwrap().is_empty());

        let again = store
            .resolve_ticket(&open.id, &resolution(DecisionStatus::Rejected))
            .await;
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));

        let missing = store
            .resolve_ticket(&Uuid::now_v7(), &resolution(DecisionStatus::Approved))
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_commit_writes_everything() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();
        let open = ticket(run.id);

        let mut commit = TransitionCommit::new(
            run.id,
            RunPatch::expecting(run.version).status(RunStatus::PendingReview),
        );
        commit.ledger.push(entry(run.id, "review_gate", Utc::now()));
        commit.open_ticket = Some(open.clone());

        let updated = store.commit(&commit).await.unwrap();
        assert_eq!(updated.status, RunStatus::PendingReview);
        assert_eq!(updated.version, 1);
        assert_eq!(store.list_ledger_entries(&run.id).await.unwrap().len(), 1);
        assert_eq!(store.list_open_tickets(&run.id).await.unwrap()[0].id, open.id);

        // Resolve and re-open in one step.
        let mut commit = TransitionCommit::new(
            run.id,
            RunPatch::expecting(updated.version).status(RunStatus::PendingReview),
        );
        commit.resolve_ticket = Some((open.id, resolution(DecisionStatus::RevisionRequested)));
        commit.open_ticket = Some(ticket(run.id));
        store.commit(&commit).await.unwrap();
        let still_open = store.list_open_tickets(&run.id).await.unwrap();
        assert_eq!(still_open.len(), 1);
        assert_ne!(still_open[0].id, open.id);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();
        store.create_ticket(&ticket(run.id)).await.unwrap();

        let mut commit = TransitionCommit::new(
            run.id,
            RunPatch::expecting(run.version).status(RunStatus::PendingReview),
        );
        commit.ledger.push(entry(run.id, "review_gate", Utc::now()));
        commit.open_ticket = Some(ticket(run.id));

        let result = store.commit(&commit).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert_eq!(store.get_run(&run.id).await.unwrap().unwrap(), run);
        assert!(store.list_ledger_entries(&run.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_stale_version_conflicts() {
        let store = SqliteRunStore::new(test_pool().await);
        let run = store.create_run("FAC-001").await.unwrap();

        let first = TransitionCommit::new(run.id, RunPatch::expecting(0).status(RunStatus::Running));
        store.commit(&first).await.unwrap();

        let mut stale =
            TransitionCommit::new(run.id, RunPatch::expecting(0).status(RunStatus::Routing));
        stale.ledger.push(entry(run.id, "qualification", Utc::now()));
        let result = store.commit(&stale).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        let after = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(after.status, RunStatus::Running);
        assert!(store.list_ledger_entries(&run.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_against_held_write_lock_conflicts() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("shared.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let store = SqliteRunStore::new(pool.clone());
        let run = store.create_run("FAC-001").await.unwrap();

        // A second process on the same file that does not wait for the lock.
        let opts = SqliteConnectOptions::from_str(&url)
            .unwrap()
            .busy_timeout(std::time::Duration::ZERO);
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        let other = SqliteRunStore::new(DatabasePool {
            reader: pool.reader.clone(),
            writer,
        });

        let commit = TransitionCommit::new(run.id, RunPatch::expecting(0).status(RunStatus::Running));
        let held = begin_write(&pool.writer).await.unwrap();
        let result = other.commit(&commit).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        held.rollback().await.unwrap();

        let committed = other.commit(&commit).await.unwrap();
        assert_eq!(committed.status, RunStatus::Running);
        assert_eq!(committed.version, 1);
    }
}
