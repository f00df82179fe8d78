use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::timestamp;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Represents an error from the storage layer. Nothing was admitted
    /// or written, so the whole operation may be retried.
    #[error("storage unavailable")]
    Sqlx { source: sqlx::Error },

    /// A required field was absent or blank.
    #[error("missing required field {field}")]
    MissingField { field: &'static str },

    /// A field was present but could not be accepted.
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The identity submitted again before its cool-down window ended.
    #[error("submission not accepted before {}", timestamp::format(*.next_eligible_time))]
    CoolDownActive { next_eligible_time: OffsetDateTime },

    /// The request lacked the admin bearer token.
    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("invalid ID {0}")]
    InvalidId(String),

    #[error("no such ID {0}")]
    NonExistentId(Uuid),

    #[error("group name already exists")]
    GroupNameAlreadyExists,
}

impl BackendError {
    /// Returns the request field this error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            BackendError::MissingField { field } | BackendError::InvalidField { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        BackendError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
