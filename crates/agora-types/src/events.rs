use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::RoomDetails;
use crate::models::{Message, ReadReceipt};

/// Events pushed to connected clients over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid },

    /// A new message was posted to a room
    MessageCreate { message: Message },

    /// A message was hidden for one user only. Sent to that user's sessions.
    MessageHidden {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },

    /// A message was removed for everyone; clients drop it without refetching.
    MessageDeleted { room_id: Uuid, message_id: Uuid },

    /// A participant advanced their read marker
    ReadReceiptUpdate { receipt: ReadReceipt },

    /// A room was created with the receiving user as a participant
    RoomCreate { room: RoomDetails },
}

impl GatewayEvent {
    /// Returns the room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::Ready { .. } => None,
            Self::MessageCreate { message } => Some(message.room_id),
            Self::MessageHidden { room_id, .. } => Some(*room_id),
            Self::MessageDeleted { room_id, .. } => Some(*room_id),
            Self::ReadReceiptUpdate { receipt } => Some(receipt.room_id),
            Self::RoomCreate { room } => Some(room.room.id),
        }
    }
}
