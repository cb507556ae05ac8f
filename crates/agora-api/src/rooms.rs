use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use agora_types::api::{Claims, CreateRoomRequest, CreateRoomResponse, RoomListResponse};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RoomListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

/// Resolve or create a room. 201 when a room was created, 200 when an
/// existing direct/self room was returned.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolution = state
        .chat
        .resolve_or_create(req.kind, claims.sub, req.participant_ids, req.name)
        .await?;

    let status = if resolution.is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(CreateRoomResponse {
            room: resolution.room,
            is_new: resolution.is_new,
        }),
    ))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RoomListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = state
        .chat
        .list_rooms(claims.sub, query.page, query.limit)
        .await?;
    Ok(Json(RoomListResponse {
        rooms,
        page: query.page,
        limit: query.limit,
    }))
}

pub async fn get_room(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.chat.get_room(claims.sub, room_id).await?))
}
