use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use agora_chat::ChatError;
use agora_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("too many requests, retry in a minute")]
    RateLimited,

    #[error("invalid {field}: {message}")]
    BadRequest {
        field: &'static str,
        message: String,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(field: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            field,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Chat(err) => match err {
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::AlreadyHidden => StatusCode::CONFLICT,
                ChatError::Unauthorized => StatusCode::FORBIDDEN,
                ChatError::Validation { .. } | ChatError::InvalidParticipants(_) => {
                    StatusCode::BAD_REQUEST
                }
                ChatError::PartialCreationFailure(_)
                | ChatError::ReferentialCleanup { .. }
                | ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, field) = match self {
            Self::Chat(err) => (err.code(), err.field()),
            Self::Unauthenticated => ("unauthenticated", None),
            Self::RateLimited => ("rate_limited", None),
            Self::BadRequest { field, .. } => ("validation_error", Some(*field)),
            Self::Internal(_) => ("internal", None),
        };

        let status = self.status();
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            match self {
                Self::Chat(ChatError::PartialCreationFailure(_)) => self.to_string(),
                _ => "internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        ErrorBody {
            error,
            code: Some(code.to_string()),
            field: field.map(str::to_string),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:?}", self);
        }
        (status, Json(self.body())).into_response()
    }
}
