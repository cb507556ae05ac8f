use tracing::{debug, info};
use uuid::Uuid;

use agora_types::api::{MessagePage, SendMessageRequest};
use agora_types::events::GatewayEvent;
use agora_types::models::{FileRef, Message, MessageKind};

use crate::{ChatError, ChatResult, ChatService, FileVerdict};

/// A message as submitted by its sender, before validation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub kind: MessageKind,
    pub file: Option<FileRef>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            file: None,
        }
    }
}

impl From<SendMessageRequest> for NewMessage {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            content: req.content,
            kind: req.kind,
            file: req.file,
        }
    }
}

impl ChatService {
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        room_id: Uuid,
        new: NewMessage,
    ) -> ChatResult<Message> {
        let content = new.content.trim().to_string();
        if content.chars().count() > self.config.max_content_len {
            return Err(ChatError::validation(
                "content",
                format!("must be at most {} characters", self.config.max_content_len),
            ));
        }

        let file = match (new.kind, new.file) {
            (MessageKind::Text, Some(_)) => {
                return Err(ChatError::validation("file", "text messages cannot carry a file"));
            }
            (MessageKind::Text, None) => {
                if content.is_empty() {
                    return Err(ChatError::validation("content", "must not be empty"));
                }
                None
            }
            (_, None) => {
                return Err(ChatError::validation("file", "required for image and file messages"));
            }
            (_, Some(file)) => Some(self.screen_file(file).await?),
        };

        let message = Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content,
            kind: new.kind,
            created_at: self.clock.now(),
            file,
            hidden_for: Vec::new(),
        };

        let stored = message.clone();
        let audience = self
            .blocking(move |db| {
                if db.get_room(room_id)?.is_none() {
                    return Err(ChatError::NotFound("room"));
                }
                let participants = db.participants(room_id)?;
                if !participants.iter().any(|p| p.user_id == sender_id) {
                    return Err(ChatError::Unauthorized);
                }
                db.insert_message(&stored)?;
                Ok(participants.into_iter().map(|p| p.user_id).collect::<Vec<_>>())
            })
            .await?;

        debug!("Message {} sent to room {}", message.id, room_id);
        self.broadcaster
            .publish(
                &audience,
                GatewayEvent::MessageCreate {
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Run an attachment past the file-security collaborator, keeping the
    /// sanitized name it hands back.
    async fn screen_file(&self, file: FileRef) -> ChatResult<FileRef> {
        if file.object_key.trim().is_empty() {
            return Err(ChatError::validation("file", "object key must not be empty"));
        }

        match self.security.inspect(&file.file_name).await {
            FileVerdict::Accept { sanitized_name } => Ok(FileRef {
                object_key: file.object_key,
                file_name: sanitized_name,
            }),
            FileVerdict::Reject { reason } => {
                info!("Rejected attachment '{}': {}", file.file_name, reason);
                Err(ChatError::validation("file", reason))
            }
        }
    }

    /// Index-addressed page of the messages `viewer` can see, oldest first.
    pub async fn list_messages(
        &self,
        viewer: Uuid,
        room_id: Uuid,
        offset: u64,
        limit: u32,
    ) -> ChatResult<MessagePage> {
        if limit == 0 || limit > self.config.max_page_size {
            return Err(ChatError::validation(
                "limit",
                format!("must be between 1 and {}", self.config.max_page_size),
            ));
        }

        self.blocking(move |db| {
            if db.get_room(room_id)?.is_none() {
                return Err(ChatError::NotFound("room"));
            }
            if !db.is_participant(room_id, viewer)? {
                return Err(ChatError::Unauthorized);
            }

            let total = db.count_visible_messages(room_id, viewer)?;
            let messages = db.visible_messages(room_id, viewer, offset, limit)?;
            Ok(MessagePage {
                total,
                offset,
                messages,
            })
        })
        .await
    }
}
