use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use agora_chat::DeleteOutcome;
use agora_types::api::{Claims, DeleteMessageResponse, SendMessageRequest};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.chat.send_message(claims.sub, room_id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Index-addressed page of a room's visible messages, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .chat
        .list_messages(claims.sub, room_id, query.offset, query.limit)
        .await?;
    Ok(Json(page))
}

pub async fn delete_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.chat.delete_message(claims.sub, message_id).await?;

    let delete_type = outcome.delete_type();
    let response = match outcome {
        DeleteOutcome::Soft { message } => DeleteMessageResponse {
            delete_type,
            updated_message: Some(message),
            deleted_message_id: None,
        },
        DeleteOutcome::Hard { message_id, .. } => DeleteMessageResponse {
            delete_type,
            updated_message: None,
            deleted_message_id: Some(message_id),
        },
    };
    Ok(Json(response))
}
