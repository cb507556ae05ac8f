use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};

use agora_types::api::{Claims, MarkReadRequest, MarkReadResponse, ReadStateQuery, ReadStateResponse};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::state::AppState;

/// Soft-fail conditions (not a participant, empty room, a message from
/// another room) still answer 200 with `success: true` and an explanatory
/// message. A message that no longer exists is a warning too, but the
/// whole room is still marked read.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room_id = req
        .room_id
        .ok_or_else(|| ApiError::bad_request("room_id", "is required"))?;

    let ack = state.chat.mark_read(claims.sub, room_id, req.message_id).await?;

    let (message, warning) = match ack.notice {
        Some(notice) if notice.is_warning() => (None, Some(notice.message().to_string())),
        Some(notice) => (Some(notice.message().to_string()), None),
        None => (None, None),
    };

    Ok(Json(MarkReadResponse {
        success: true,
        message,
        warning,
        receipt: ack.receipt,
    }))
}

/// The caller's receipt for one room, or their most recent receipts when
/// no room is given.
pub async fn get_read_state(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ReadStateQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let response = match query.room_id {
        Some(room_id) => ReadStateResponse::Single {
            receipt: state.chat.get_receipt(claims.sub, room_id).await?,
        },
        None => ReadStateResponse::List {
            receipts: state.chat.list_receipts(claims.sub).await?,
        },
    };
    Ok(Json(response))
}
