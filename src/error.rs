use crate::request::RequestStatus;
use crate::subject::TimeStamp;
use chrono::Utc;

/// Errors surfaced by the workflow. Business failures are separate variants
/// so the API boundary can map each to its own status code; `Storage` and
/// `Codec` are infrastructure failures and never overlap with the rest.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("change request not found: {0}")]
    NotFound(String),
    #[error("subject not found: {0}")]
    SubjectNotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("cannot {action} a {status} request")]
    InvalidTransition {
        action: &'static str,
        status: RequestStatus,
    },
    #[error("request {id} is not effective until {effective}")]
    NotYetEffective {
        id: String,
        effective: TimeStamp<Utc>,
    },
    #[error("request {0} has already been applied")]
    AlreadyApplied(String),
    #[error("subject {subject_id} has an approved unapplied change over the same fields: {conflicting_id}")]
    ConflictingChangeExists {
        subject_id: String,
        conflicting_id: String,
    },
    #[error("actor {actor} is not allowed to {action} this request")]
    Unauthorized {
        actor: String,
        action: &'static str,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}
