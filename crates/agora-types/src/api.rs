use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FileRef, Message, MessageKind, Participant, ReadReceipt, Room, RoomKind};

// -- JWT Claims --

/// Claims minted by the external identity provider. `sub` is the stable
/// user id; the server never issues tokens itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    pub file: Option<FileRef>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    /// Number of messages in the room visible to the caller.
    pub total: u64,
    pub offset: u64,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteType {
    Soft,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageResponse {
    pub delete_type: DeleteType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_message_id: Option<Uuid>,
}

// -- Read receipts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub room_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReadReceipt>,
}

#[derive(Debug, Deserialize)]
pub struct ReadStateQuery {
    pub room_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadStateResponse {
    List { receipts: Vec<ReadReceipt> },
    Single { receipt: Option<ReadReceipt> },
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    #[serde(rename = "type")]
    pub kind: RoomKind,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    pub name: Option<String>,
}

/// A room together with its participants. `participants` is always a list,
/// even for self rooms with a single member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetails {
    #[serde(flatten)]
    pub room: Room,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room: RoomDetails,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: RoomDetails,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
    pub page: u32,
    pub limit: u32,
}
