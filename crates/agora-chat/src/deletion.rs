use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_db::{ServiceIdentity, ServiceScope, StoreTx};
use agora_types::api::DeleteType;
use agora_types::events::GatewayEvent;
use agora_types::models::{Message, Participant};

use crate::collaborators::retry_once;
use crate::{ChatError, ChatResult, ChatService};

/// Result of a delete request.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// Hidden for the actor only; carries the message with its updated
    /// `hidden_for` set.
    Soft { message: Message },
    /// Removed for every participant.
    Hard { message_id: Uuid, room_id: Uuid },
}

impl DeleteOutcome {
    pub fn delete_type(&self) -> DeleteType {
        match self {
            Self::Soft { .. } => DeleteType::Soft,
            Self::Hard { .. } => DeleteType::Hard,
        }
    }

    pub fn message_id(&self) -> Uuid {
        match self {
            Self::Soft { message } => message.id,
            Self::Hard { message_id, .. } => *message_id,
        }
    }
}

enum Decision {
    Soft(Message),
    Hard { message: Message, audience: Vec<Uuid> },
}

impl ChatService {
    /// Delete `message_id` on behalf of `actor`.
    ///
    /// A non-sender only ever hides the message for themselves. The sender
    /// removes it for everyone unless another participant has already read
    /// it, in which case it is hidden for the sender only. The read check and
    /// the mutation run in one write transaction, so a concurrent mark-read
    /// either lands first (soft) or after the row is gone (hard).
    pub async fn delete_message(&self, actor: Uuid, message_id: Uuid) -> ChatResult<DeleteOutcome> {
        let now = self.clock.now();

        let decision = self
            .blocking(move |db| {
                let identity = ServiceIdentity::scoped(ServiceScope::DeletionMutation);
                db.with_tx(|tx| decide_and_apply(tx, &identity, actor, message_id, now))
            })
            .await?;

        match decision {
            Decision::Soft(message) => {
                info!("Message {} hidden for user {}", message.id, actor);
                self.broadcaster
                    .publish(
                        &[actor],
                        GatewayEvent::MessageHidden {
                            room_id: message.room_id,
                            message_id: message.id,
                            user_id: actor,
                        },
                    )
                    .await;
                Ok(DeleteOutcome::Soft { message })
            }
            Decision::Hard { message, audience } => {
                info!("Message {} removed by its sender {}", message.id, actor);
                self.cleanup_after_removal(&message).await;
                self.broadcaster
                    .publish(
                        &audience,
                        GatewayEvent::MessageDeleted {
                            room_id: message.room_id,
                            message_id: message.id,
                        },
                    )
                    .await;
                Ok(DeleteOutcome::Hard {
                    message_id: message.id,
                    room_id: message.room_id,
                })
            }
        }
    }

    /// Best-effort follow-up once a message row is gone. Failures are
    /// logged and never reach the caller.
    async fn cleanup_after_removal(&self, message: &Message) {
        let message_id = message.id;

        if let Some(file) = message.file.as_ref().filter(|_| message.kind.carries_object()) {
            let key = file.object_key.as_str();
            if let Err(e) = retry_once("file object deletion", || self.files.delete_object(key)).await {
                let err = ChatError::ReferentialCleanup {
                    message_id,
                    reason: format!("object {}: {}", key, e),
                };
                warn!("{}", err);
            }
        }

        let cleared = retry_once("receipt pointer cleanup", || {
            let db = self.db.clone();
            async move {
                let cleared =
                    tokio::task::spawn_blocking(move || db.clear_receipt_pointers(message_id)).await??;
                Ok::<_, anyhow::Error>(cleared)
            }
        })
        .await;

        match cleared {
            Ok(0) => {}
            Ok(n) => debug!("Cleared {} read markers pointing at message {}", n, message_id),
            Err(e) => {
                let err = ChatError::ReferentialCleanup {
                    message_id,
                    reason: e.to_string(),
                };
                warn!("{}", err);
            }
        }
    }
}

fn decide_and_apply(
    tx: &StoreTx<'_>,
    identity: &ServiceIdentity,
    actor: Uuid,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> ChatResult<Decision> {
    let mut message = tx
        .load_message(identity, message_id)?
        .ok_or(ChatError::NotFound("message"))?;

    let participants = tx.participants(message.room_id)?;
    if !participants.iter().any(|p| p.user_id == actor) {
        return Err(ChatError::Unauthorized);
    }
    if message.is_hidden_for(actor) {
        return Err(ChatError::AlreadyHidden);
    }

    let remove = actor == message.sender_id
        && !read_by_others(tx, &message, &others_than(&participants, actor))?;

    if remove {
        tx.delete_message(identity, message_id)?;
        let audience = participants.iter().map(|p| p.user_id).collect();
        return Ok(Decision::Hard { message, audience });
    }

    if !tx.hide_message(identity, message_id, actor, now)? {
        return Err(ChatError::AlreadyHidden);
    }
    message.hidden_for.push(actor);
    Ok(Decision::Soft(message))
}

fn others_than(participants: &[Participant], actor: Uuid) -> HashSet<Uuid> {
    participants
        .iter()
        .map(|p| p.user_id)
        .filter(|id| *id != actor)
        .collect()
}

/// Whether any of `others` has a read marker at or after the message.
/// An empty set of others means nobody else can have read it.
fn read_by_others(tx: &StoreTx<'_>, message: &Message, others: &HashSet<Uuid>) -> ChatResult<bool> {
    if others.is_empty() {
        return Ok(false);
    }

    let receipts = tx.receipts_in_room(message.room_id)?;
    Ok(receipts
        .iter()
        .any(|r| others.contains(&r.user_id) && r.last_read_at >= message.created_at))
}
