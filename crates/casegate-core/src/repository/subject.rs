//! Subject repository trait definition.

use casegate_types::error::RepositoryError;
use casegate_types::subject::Subject;
use serde_json::{Map, Value};

/// Storage for subjects and their facility profiles.
pub trait SubjectRepository: Send + Sync {
    /// Get a subject by its external identifier.
    fn get_subject(
        &self,
        subject_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Subject>, RepositoryError>> + Send;

    /// Merge `patch` into the subject's profile, creating the subject if it
    /// does not exist. Keys absent from `patch` are kept; `null` removes.
    fn upsert_profile(
        &self,
        subject_id: &str,
        patch: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<Subject, RepositoryError>> + Send;
}
