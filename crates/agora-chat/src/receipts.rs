use tracing::{debug, warn};
use uuid::Uuid;

use agora_types::events::GatewayEvent;
use agora_types::models::ReadReceipt;

use crate::{ChatResult, ChatService};

/// Notes attached to a mark-read acknowledgement. All of these are
/// answered as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadNotice {
    NotParticipant,
    NoMessages,
    MessageMissing,
    /// The message was removed before the marker landed; the marker moved
    /// to the room's newest remaining message instead.
    MessageGone,
}

impl ReadNotice {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotParticipant => "Not a participant of this room",
            Self::NoMessages => "No messages to mark as read",
            Self::MessageMissing => "Message not found in this room; read marker unchanged",
            Self::MessageGone => "Message no longer exists; marked the room as read",
        }
    }

    /// Whether the requested message could not be used as the marker.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::MessageMissing | Self::MessageGone)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkReadAck {
    /// Whether the stored marker moved. `false` for writes older than the
    /// stored marker and for every notice except `MessageGone`.
    pub applied: bool,
    pub receipt: Option<ReadReceipt>,
    pub notice: Option<ReadNotice>,
}

impl MarkReadAck {
    fn notice(notice: ReadNotice) -> Self {
        Self {
            applied: false,
            receipt: None,
            notice: Some(notice),
        }
    }
}

impl ChatService {
    /// Move `user_id`'s read marker in `room_id` to `message_id`, or to the
    /// newest message when none is given. Timestamped with the service clock;
    /// a marker never moves backwards.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        message_id: Option<Uuid>,
    ) -> ChatResult<MarkReadAck> {
        let now = self.clock.now();

        let (ack, others) = self
            .blocking(move |db| {
                if !db.is_participant(room_id, user_id)? {
                    return Ok((MarkReadAck::notice(ReadNotice::NotParticipant), vec![]));
                }

                let (target, notice) = match message_id {
                    Some(id) => match db.message_room(id)? {
                        Some(owner) if owner == room_id => (Some(id), None),
                        Some(_) => {
                            warn!(
                                "User {} marked message {} from another room read in room {}",
                                user_id, id, room_id
                            );
                            return Ok((MarkReadAck::notice(ReadNotice::MessageMissing), vec![]));
                        }
                        // Hard-deleted by its sender while this request was in flight.
                        None => {
                            debug!(
                                "Message {} is gone; advancing marker for user {} in room {}",
                                id, user_id, room_id
                            );
                            (db.latest_message_id(room_id)?, Some(ReadNotice::MessageGone))
                        }
                    },
                    None => match db.latest_message_id(room_id)? {
                        Some(id) => (Some(id), None),
                        None => return Ok((MarkReadAck::notice(ReadNotice::NoMessages), vec![])),
                    },
                };

                let applied = db.upsert_receipt(user_id, room_id, target, now)?;
                let receipt = db.get_receipt(user_id, room_id)?;
                let others = if applied {
                    db.participants(room_id)?
                        .into_iter()
                        .map(|p| p.user_id)
                        .filter(|id| *id != user_id)
                        .collect()
                } else {
                    debug!("Stale read marker for user {} in room {} ignored", user_id, room_id);
                    vec![]
                };

                Ok((
                    MarkReadAck {
                        applied,
                        receipt,
                        notice,
                    },
                    others,
                ))
            })
            .await?;

        if let (true, Some(receipt)) = (ack.applied, ack.receipt.clone()) {
            if !others.is_empty() {
                self.broadcaster
                    .publish(&others, GatewayEvent::ReadReceiptUpdate { receipt })
                    .await;
            }
        }

        Ok(ack)
    }

    pub async fn get_receipt(&self, user_id: Uuid, room_id: Uuid) -> ChatResult<Option<ReadReceipt>> {
        self.blocking(move |db| Ok(db.get_receipt(user_id, room_id)?))
            .await
    }

    /// The user's receipts for their most recently read rooms.
    pub async fn list_receipts(&self, user_id: Uuid) -> ChatResult<Vec<ReadReceipt>> {
        let limit = self.config.receipt_list_limit;
        self.blocking(move |db| Ok(db.list_receipts(user_id, limit)?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::Clock;
    use crate::testing::{harness, start};

    #[tokio::test]
    async fn marks_latest_message_when_none_given() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = h.group(&[alice, bob]);
        h.send_text(room, alice, "one").await;
        let latest = h.send_text(room, alice, "two").await;
        h.tick();
        h.broadcasts.take();

        let ack = h.service.mark_read(bob, room, None).await.unwrap();
        assert!(ack.applied);
        assert_eq!(ack.notice, None);
        let receipt = ack.receipt.unwrap();
        assert_eq!(receipt.last_read_message_id, Some(latest.id));
        assert_eq!(receipt.last_read_at, h.clock.now());

        let events = h.broadcasts.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, vec![alice]);
        assert!(matches!(events[0].1, GatewayEvent::ReadReceiptUpdate { .. }));
    }

    #[tokio::test]
    async fn soft_failures_are_acknowledged() {
        let h = harness();
        let (alice, outsider) = (Uuid::new_v4(), Uuid::new_v4());
        let room = h.group(&[alice]);

        let ack = h.service.mark_read(alice, room, None).await.unwrap();
        assert_eq!(ack.notice, Some(ReadNotice::NoMessages));
        assert!(!ack.applied);

        let ack = h.service.mark_read(outsider, room, None).await.unwrap();
        assert_eq!(ack.notice, Some(ReadNotice::NotParticipant));

        assert!(h.service.get_receipt(alice, room).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_from_another_room_is_not_recorded() {
        let h = harness();
        let alice = Uuid::new_v4();
        let room = h.group(&[alice]);
        let elsewhere = h.group(&[alice]);
        let foreign = h.send_text(elsewhere, alice, "elsewhere").await;

        let ack = h.service.mark_read(alice, room, Some(foreign.id)).await.unwrap();
        assert_eq!(ack.notice, Some(ReadNotice::MessageMissing));
        assert!(ReadNotice::MessageMissing.is_warning());
        assert!(!ack.applied);
        assert!(h.service.get_receipt(alice, room).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_target_still_clears_unread() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = h.group(&[alice, bob]);
        let kept = h.send_text(room, alice, "kept").await;
        let removed = h.send_text(room, alice, "oops").await;
        h.tick();

        // Bob's read of `removed` arrives after alice already hard-deleted it.
        let outcome = h.service.delete_message(alice, removed.id).await.unwrap();
        assert!(matches!(outcome, crate::DeleteOutcome::Hard { .. }));
        assert_eq!(h.service.unread(bob, room).await.unwrap(), 1);
        h.tick();
        h.broadcasts.take();

        let ack = h.service.mark_read(bob, room, Some(removed.id)).await.unwrap();
        assert!(ack.applied);
        assert_eq!(ack.notice, Some(ReadNotice::MessageGone));
        assert!(ReadNotice::MessageGone.is_warning());
        let receipt = ack.receipt.unwrap();
        assert_eq!(receipt.last_read_message_id, Some(kept.id));
        assert_eq!(receipt.last_read_at, h.clock.now());
        assert_eq!(h.service.unread(bob, room).await.unwrap(), 0);

        let events = h.broadcasts.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, vec![alice]);
    }

    #[tokio::test]
    async fn removed_only_message_leaves_an_empty_marker() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = h.group(&[alice, bob]);
        let only = h.send_text(room, alice, "gone soon").await;
        h.service.delete_message(alice, only.id).await.unwrap();
        h.tick();

        let ack = h.service.mark_read(bob, room, Some(only.id)).await.unwrap();
        assert_eq!(ack.notice, Some(ReadNotice::MessageGone));
        let receipt = h.service.get_receipt(bob, room).await.unwrap().unwrap();
        assert_eq!(receipt.last_read_message_id, None);
        assert_eq!(h.service.unread(bob, room).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn markers_never_move_backwards() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = h.group(&[alice, bob]);
        let first = h.send_text(room, alice, "one").await;
        let second = h.send_text(room, alice, "two").await;

        h.clock.set(start() + Duration::seconds(60));
        assert!(h.service.mark_read(bob, room, Some(second.id)).await.unwrap().applied);
        let high = h.service.get_receipt(bob, room).await.unwrap().unwrap();

        for back in [0, 10, 30] {
            h.clock.set(start() + Duration::seconds(60 - back));
            let ack = h.service.mark_read(bob, room, Some(first.id)).await.unwrap();
            assert!(!ack.applied);
            assert_eq!(ack.receipt.as_ref(), Some(&high));
        }

        let stored = h.service.get_receipt(bob, room).await.unwrap().unwrap();
        assert_eq!(stored.last_read_at, high.last_read_at);
        assert_eq!(stored.last_read_message_id, Some(second.id));
    }

    #[tokio::test]
    async fn list_is_bounded_by_config() {
        let h = harness();
        let bob = Uuid::new_v4();
        let service = h.service.clone().with_config(crate::ChatConfig {
            receipt_list_limit: 2,
            ..Default::default()
        });

        for _ in 0..3 {
            let room = h.group(&[bob]);
            h.send_text(room, bob, "note").await;
            service.mark_read(bob, room, None).await.unwrap();
        }

        assert_eq!(service.list_receipts(bob).await.unwrap().len(), 2);
        assert_eq!(h.service.list_receipts(bob).await.unwrap().len(), 3);
    }
}
