//! SQLite subject repository implementation.
//!
//! Facility profiles are stored as one JSON document per subject.

use casegate_core::repository::subject::SubjectRepository;
use casegate_types::error::RepositoryError;
use casegate_types::subject::{FacilityProfile, Subject};
use serde_json::{Map, Value};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{begin_write, format_datetime, now, parse_datetime, query_err};

/// SQLite-backed implementation of `SubjectRepository`.
#[derive(Clone)]
pub struct SqliteSubjectRepository {
    pool: DatabasePool,
}

impl SqliteSubjectRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct SubjectRow {
    id: String,
    profile: String,
    created_at: String,
    updated_at: String,
}

impl SubjectRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            profile: row.try_get("profile")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_subject(self) -> Result<Subject, RepositoryError> {
        let profile: FacilityProfile = serde_json::from_str(&self.profile)
            .map_err(|e| RepositoryError::Query(format!("invalid profile JSON: {e}")))?;
        Ok(Subject {
            id: self.id,
            profile,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl SubjectRepository for SqliteSubjectRepository {
    async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM subjects WHERE id = ?")
            .bind(subject_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(SubjectRow::from_row(&row).map_err(query_err)?.into_subject()?)),
            None => Ok(None),
        }
    }

    async fn upsert_profile(
        &self,
        subject_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<Subject, RepositoryError> {
        let mut tx = begin_write(&self.pool.writer).await?;

        let existing = sqlx::query("SELECT * FROM subjects WHERE id = ?")
            .bind(subject_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .map(|row| SubjectRow::from_row(&row).map_err(query_err)?.into_subject())
            .transpose()?;

        let now = now();
        let subject = match existing {
            Some(current) => Subject {
                profile: current
                    .profile
                    .merge_patch(patch)
                    .map_err(|e| RepositoryError::Query(format!("invalid profile patch: {e}")))?,
                updated_at: now,
                ..current
            },
            None => Subject {
                id: subject_id.to_string(),
                profile: FacilityProfile::default()
                    .merge_patch(patch)
                    .map_err(|e| RepositoryError::Query(format!("invalid profile patch: {e}")))?,
                created_at: now,
                updated_at: now,
            },
        };

        let profile = serde_json::to_string(&subject.profile)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        sqlx::query(
            r#"INSERT INTO subjects (id, profile, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at"#,
        )
        .bind(&subject.id)
        .bind(profile)
        .bind(format_datetime(&subject.created_at))
        .bind(format_datetime(&subject.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        tracing::debug!(subject_id, "subject profile saved");
        Ok(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn test_get_missing_subject() {
        let repo = SqliteSubjectRepository::new(test_pool().await);
        assert!(repo.get_subject("FAC-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let repo = SqliteSubjectRepository::new(test_pool().await);

        let patch = json!({
            "name": "Plant 1",
            "annual_diesel_runtime_hours": 5800,
            "facility_power_load_kw": 500,
            "climate_zone": "4A"
        });
        let created = repo
            .upsert_profile("FAC-001", patch.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(created.profile.annual_operating_hours, Some(5800.0));
        assert_eq!(created.profile.facility_power_load, Some(500.0));

        let patch = json!({"monthly_demand_charge": 8000, "climate_zone": null});
        let merged = repo
            .upsert_profile("FAC-001", patch.as_object().unwrap())
            .await
            .unwrap();

        let fetched = repo.get_subject("FAC-001").await.unwrap().unwrap();
        assert_eq!(fetched, merged);
        assert_eq!(fetched.created_at, created.created_at);
        assert_eq!(fetched.profile.name.as_deref(), Some("Plant 1"));
        assert_eq!(fetched.profile.annual_operating_hours, Some(5800.0));
        assert_eq!(fetched.profile.monthly_demand_charge, Some(8000.0));
        assert!(!fetched.profile.extra.contains_key("climate_zone"));
    }
}
