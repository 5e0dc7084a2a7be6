//! Error taxonomy for triage operations.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("escalation {0} not found")]
    EscalationNotFound(Uuid),

    #[error("student profile '{0}' not found")]
    StudentNotFound(String),

    #[error("notification {0} not found")]
    NotificationNotFound(Uuid),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Disallowed status transition.
    #[error("status conflict: cannot move from {from} to {to}")]
    Conflict { from: String, to: String },

    /// Caller does not own the escalation it tried to act on.
    #[error("student '{student_id}' may not act on escalation {escalation_id}")]
    Forbidden {
        escalation_id: Uuid,
        student_id: String,
    },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl TriageError {
    pub fn invalid(message: impl Into<String>) -> Self {
        TriageError::InvalidArgument(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TriageError::EscalationNotFound(_)
                | TriageError::StudentNotFound(_)
                | TriageError::NotificationNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
