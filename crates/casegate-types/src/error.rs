use thiserror::Error;

/// Errors from repository operations (used by trait definitions in casegate-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// A submitted decision or reviewer identity failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid decision status: '{0}' (expected approved, rejected or revision_requested)")]
    DecisionStatus(String),

    #[error("reviewer id must not be empty")]
    EmptyReviewer,

    #[error("run {run_id} belongs to subject '{owner}', not '{requested}'")]
    SubjectMismatch {
        run_id: String,
        owner: String,
        requested: String,
    },
}

/// A stage tried to write a payload namespace it does not own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fragment '{fragment}' cannot be written to namespace '{namespace}'")]
pub struct NamespaceViolation {
    pub namespace: String,
    pub fragment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_validation_error_names_bad_status() {
        let err = ValidationError::DecisionStatus("maybe".to_string());
        assert!(err.to_string().contains("'maybe'"));
    }

    #[test]
    fn test_namespace_violation_display() {
        let err = NamespaceViolation {
            namespace: "qualification".to_string(),
            fragment: "analysis".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "fragment 'analysis' cannot be written to namespace 'qualification'"
        );
    }
}
