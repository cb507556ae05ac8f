use std::collections::HashMap;

use uuid::Uuid;

use crate::{ChatResult, ChatService};

impl ChatService {
    /// Unread counts for a batch of rooms, computed on demand. Every
    /// requested room appears in the result. A message counts as unread when
    /// it was created after the user's read marker and is not hidden for them;
    /// the user's own messages are included.
    pub async fn unread_for_rooms(
        &self,
        user_id: Uuid,
        room_ids: Vec<Uuid>,
    ) -> ChatResult<HashMap<Uuid, u64>> {
        self.blocking(move |db| Ok(db.unread_counts(user_id, &room_ids)?))
            .await
    }

    pub async fn unread(&self, user_id: Uuid, room_id: Uuid) -> ChatResult<u64> {
        let counts = self.unread_for_rooms(user_id, vec![room_id]).await?;
        Ok(counts.get(&room_id).copied().unwrap_or(0))
    }
}
