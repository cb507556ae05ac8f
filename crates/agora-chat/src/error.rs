use thiserror::Error;
use uuid::Uuid;

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Errors produced by the messaging core.
///
/// Only the actor-facing decision errors (`NotFound`, `AlreadyHidden`,
/// `Unauthorized`, `Validation`, `InvalidParticipants`) are meant to reach
/// callers. `ReferentialCleanup` describes best-effort failures after a
/// hard delete; it is logged and never returned from a public operation.
/// Concurrent room creation collisions never surface at all: the losing
/// request is answered with the winning room.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("message is already hidden for this user")]
    AlreadyHidden,

    #[error("user is not a participant of this room")]
    Unauthorized,

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("room creation failed and was rolled back")]
    PartialCreationFailure(#[source] anyhow::Error),

    #[error("cleanup after removing message {message_id} failed: {reason}")]
    ReferentialCleanup { message_id: Uuid, reason: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyHidden => "already_hidden",
            Self::Unauthorized => "unauthorized",
            Self::Validation { .. } => "validation_error",
            Self::InvalidParticipants(_) => "invalid_participants",
            Self::PartialCreationFailure(_) => "partial_creation_failure",
            Self::ReferentialCleanup { .. } => "referential_cleanup_failure",
            Self::Storage(_) => "internal",
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(*field),
            Self::InvalidParticipants(_) => Some("participant_ids"),
            _ => None,
        }
    }
}
