use std::collections::BTreeSet;

use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use agora_db::{ServiceIdentity, ServiceScope, StoreTx};
use agora_types::api::{RoomDetails, RoomSummary};
use agora_types::events::GatewayEvent;
use agora_types::models::{Participant, Room, RoomKind};

use crate::{ChatError, ChatResult, ChatService};

const MAX_ROOM_NAME_LEN: usize = 100;
const MAX_GROUP_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct RoomResolution {
    pub room: RoomDetails,
    /// `false` when an existing direct/self room was returned.
    pub is_new: bool,
}

/// Who ends up in the room and the key that deduplicates it, if any.
struct RoomPlan {
    kind: RoomKind,
    members: BTreeSet<Uuid>,
    dedup_key: Option<String>,
    name: Option<String>,
}

fn plan_room(
    kind: RoomKind,
    creator: Uuid,
    participant_ids: &[Uuid],
    name: Option<String>,
) -> ChatResult<RoomPlan> {
    let others: BTreeSet<Uuid> = participant_ids
        .iter()
        .copied()
        .filter(|id| *id != creator)
        .collect();

    let dedup_key = match kind {
        RoomKind::Direct => {
            if participant_ids.is_empty() {
                return Err(ChatError::InvalidParticipants(
                    "a direct room needs one other participant".into(),
                ));
            }
            let mut iter = others.iter();
            let (Some(other), None) = (iter.next(), iter.next()) else {
                return Err(ChatError::InvalidParticipants(if others.is_empty() {
                    "cannot open a direct room with yourself; use a self room".into()
                } else {
                    "a direct room has exactly two participants".into()
                }));
            };
            let (low, high) = if creator < *other {
                (creator, *other)
            } else {
                (*other, creator)
            };
            Some(format!("direct:{}:{}", low, high))
        }
        RoomKind::SelfRoom => {
            if !others.is_empty() {
                return Err(ChatError::InvalidParticipants(
                    "a self room has no other participants".into(),
                ));
            }
            Some(format!("self:{}", creator))
        }
        RoomKind::Group => {
            if others.is_empty() {
                return Err(ChatError::InvalidParticipants(
                    "a group needs at least one other participant".into(),
                ));
            }
            if others.len() + 1 > MAX_GROUP_SIZE {
                return Err(ChatError::InvalidParticipants(format!(
                    "a group has at most {} participants",
                    MAX_GROUP_SIZE
                )));
            }
            None
        }
    };

    // Only groups carry a name.
    let name = match kind {
        RoomKind::Group => name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        _ => None,
    };
    if let Some(n) = &name {
        if n.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(ChatError::validation(
                "name",
                format!("must be at most {} characters", MAX_ROOM_NAME_LEN),
            ));
        }
    }

    let mut members = others;
    members.insert(creator);

    Ok(RoomPlan {
        kind,
        members,
        dedup_key,
        name,
    })
}

fn existing(tx: &StoreTx<'_>, room: Room) -> ChatResult<RoomResolution> {
    let participants = tx.participants(room.id)?;
    Ok(RoomResolution {
        room: RoomDetails { room, participants },
        is_new: false,
    })
}

impl ChatService {
    /// Get or create the direct room between two users.
    pub async fn resolve_direct(&self, user_a: Uuid, user_b: Uuid) -> ChatResult<RoomResolution> {
        self.resolve_or_create(RoomKind::Direct, user_a, vec![user_b], None)
            .await
    }

    /// Get-or-create for direct and self rooms, plain create for groups.
    ///
    /// The lookup, the guarded insert and the participant rows share one
    /// write transaction. Two callers racing on the same pair converge on
    /// whichever insert won the dedup key.
    pub async fn resolve_or_create(
        &self,
        kind: RoomKind,
        creator: Uuid,
        participant_ids: Vec<Uuid>,
        name: Option<String>,
    ) -> ChatResult<RoomResolution> {
        let plan = plan_room(kind, creator, &participant_ids, name)?;
        let now = self.clock.now();

        let resolution = self
            .blocking(move |db| {
                let identity = ServiceIdentity::scoped(ServiceScope::RoomDedup);
                db.with_tx(|tx| {
                    if let Some(key) = plan.dedup_key.as_deref() {
                        if let Some(room) = tx.find_room_by_dedup_key(&identity, key)? {
                            return existing(tx, room);
                        }
                    }

                    let room = Room {
                        id: Uuid::new_v4(),
                        kind: plan.kind,
                        name: plan.name.clone(),
                        created_at: now,
                    };

                    if !tx.insert_room(&room, plan.dedup_key.as_deref())? {
                        let key = plan.dedup_key.as_deref().unwrap_or_default();
                        let winner = tx
                            .find_room_by_dedup_key(&identity, key)?
                            .ok_or_else(|| anyhow!("dedup key {} held by no room", key))?;
                        info!("Room creation for {} lost the race to {}", key, winner.id);
                        return existing(tx, winner);
                    }

                    let participants: Vec<Participant> = plan
                        .members
                        .iter()
                        .map(|user_id| Participant {
                            room_id: room.id,
                            user_id: *user_id,
                            joined_at: now,
                            is_admin: plan.kind == RoomKind::Group && *user_id == creator,
                        })
                        .collect();

                    if let Err(e) = tx.insert_participants(&participants) {
                        // Remove the room row before the rollback so the
                        // failure never leaves an empty room behind.
                        if let Err(cleanup) = tx.delete_room(room.id) {
                            warn!("Failed to remove half-created room {}: {}", room.id, cleanup);
                        }
                        return Err(ChatError::PartialCreationFailure(e));
                    }

                    Ok(RoomResolution {
                        room: RoomDetails { room, participants },
                        is_new: true,
                    })
                })
            })
            .await;

        let resolution = match resolution {
            Err(ChatError::PartialCreationFailure(e)) => {
                warn!("Room creation by {} rolled back: {:#}", creator, e);
                return Err(ChatError::PartialCreationFailure(e));
            }
            other => other?,
        };

        if resolution.is_new {
            info!(
                "Created {} room {} for {}",
                resolution.room.room.kind.as_str(),
                resolution.room.room.id,
                creator
            );
            let audience: Vec<Uuid> = resolution
                .room
                .participants
                .iter()
                .map(|p| p.user_id)
                .collect();
            self.broadcaster
                .publish(
                    &audience,
                    GatewayEvent::RoomCreate {
                        room: resolution.room.clone(),
                    },
                )
                .await;
        }

        Ok(resolution)
    }

    pub async fn get_room(&self, viewer: Uuid, room_id: Uuid) -> ChatResult<RoomDetails> {
        self.blocking(move |db| {
            let room = db.get_room(room_id)?.ok_or(ChatError::NotFound("room"))?;
            let participants = db.participants(room_id)?;
            if !participants.iter().any(|p| p.user_id == viewer) {
                return Err(ChatError::Unauthorized);
            }
            Ok(RoomDetails { room, participants })
        })
        .await
    }

    /// A page of the user's rooms, most recently active first, each with its
    /// newest visible message and unread count. `page` starts at 1.
    pub async fn list_rooms(&self, user_id: Uuid, page: u32, limit: u32) -> ChatResult<Vec<RoomSummary>> {
        if page == 0 {
            return Err(ChatError::validation("page", "must be at least 1"));
        }
        if limit == 0 || limit > self.config.max_page_size {
            return Err(ChatError::validation(
                "limit",
                format!("must be between 1 and {}", self.config.max_page_size),
            ));
        }
        let offset = u64::from(page - 1) * u64::from(limit);

        self.blocking(move |db| {
            let rooms = db.rooms_for_user(user_id, offset, limit)?;
            let ids: Vec<Uuid> = rooms.iter().map(|r| r.id).collect();

            let mut participants = db.participants_for_rooms(&ids)?;
            let mut last_messages = db.last_visible_messages(user_id, &ids)?;
            let unread = db.unread_counts(user_id, &ids)?;

            Ok(rooms
                .into_iter()
                .map(|room| {
                    let id = room.id;
                    RoomSummary {
                        room: RoomDetails {
                            room,
                            participants: participants.remove(&id).unwrap_or_default(),
                        },
                        last_message: last_messages.remove(&id),
                        unread_count: unread.get(&id).copied().unwrap_or(0),
                    }
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;

    #[tokio::test]
    async fn direct_room_is_reused_in_either_order() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let first = h.service.resolve_direct(alice, bob).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.room.participants.len(), 2);
        assert!(first.room.participants.iter().all(|p| !p.is_admin));

        let second = h.service.resolve_direct(bob, alice).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.room.room.id, first.room.room.id);

        let events = h.broadcasts.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].1, GatewayEvent::RoomCreate { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_creates_one_room() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let service = h.service.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        service.resolve_direct(alice, bob).await
                    } else {
                        service
                            .resolve_or_create(RoomKind::Direct, bob, vec![alice], None)
                            .await
                    }
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        let room_id = results[0].room.room.id;
        assert!(results.iter().all(|r| r.room.room.id == room_id));
        assert_eq!(results.iter().filter(|r| r.is_new).count(), 1);
        assert_eq!(h.db().rooms_for_user(alice, 0, 50).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_rooms_dedup_and_groups_do_not() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let note = h
            .service
            .resolve_or_create(RoomKind::SelfRoom, alice, vec![], None)
            .await
            .unwrap();
        let again = h
            .service
            .resolve_or_create(RoomKind::SelfRoom, alice, vec![alice], None)
            .await
            .unwrap();
        assert!(note.is_new && !again.is_new);
        assert_eq!(again.room.participants.len(), 1);

        let g1 = h
            .service
            .resolve_or_create(RoomKind::Group, alice, vec![bob], Some(" Team ".into()))
            .await
            .unwrap();
        let g2 = h
            .service
            .resolve_or_create(RoomKind::Group, alice, vec![bob], Some("Team".into()))
            .await
            .unwrap();
        assert!(g1.is_new && g2.is_new);
        assert_ne!(g1.room.room.id, g2.room.room.id);
        assert_eq!(g1.room.room.name.as_deref(), Some("Team"));

        let admins: Vec<Uuid> = g1
            .room
            .participants
            .iter()
            .filter(|p| p.is_admin)
            .map(|p| p.user_id)
            .collect();
        assert_eq!(admins, vec![alice]);
    }

    #[tokio::test]
    async fn invalid_participant_lists_are_rejected() {
        let h = harness();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let cases = [
            (RoomKind::Direct, vec![]),
            (RoomKind::Direct, vec![alice]),
            (RoomKind::Direct, vec![bob, carol]),
            (RoomKind::SelfRoom, vec![bob]),
            (RoomKind::Group, vec![]),
            (RoomKind::Group, vec![alice]),
        ];
        for (kind, ids) in cases {
            let result = h.service.resolve_or_create(kind, alice, ids, None).await;
            assert!(
                matches!(result, Err(ChatError::InvalidParticipants(_))),
                "{:?} should be rejected",
                kind
            );
        }

        let long = "x".repeat(MAX_ROOM_NAME_LEN + 1);
        let result = h
            .service
            .resolve_or_create(RoomKind::Group, alice, vec![bob], Some(long))
            .await;
        assert!(matches!(result, Err(ChatError::Validation { field: "name", .. })));
    }

    #[tokio::test]
    async fn failed_participant_insert_rolls_back_room() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        h.db()
            .with_conn_mut(|conn| Ok(conn.execute_batch("DROP TABLE participants")?))
            .unwrap();

        let result = h.service.resolve_direct(alice, bob).await;
        assert!(matches!(result, Err(ChatError::PartialCreationFailure(_))));

        let rooms: i64 = h
            .db()
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rooms, 0);
        assert!(h.broadcasts.take().is_empty());
    }

    #[tokio::test]
    async fn room_details_are_participant_only() {
        let h = harness();
        let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let room = h.service.resolve_direct(alice, bob).await.unwrap().room.room.id;

        assert_eq!(h.service.get_room(bob, room).await.unwrap().participants.len(), 2);
        assert!(matches!(h.service.get_room(mallory, room).await, Err(ChatError::Unauthorized)));
        assert!(matches!(
            h.service.get_room(alice, Uuid::new_v4()).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn room_list_carries_last_message_and_unread() {
        let h = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let direct = h.service.resolve_direct(alice, bob).await.unwrap().room.room.id;
        h.tick();
        let quiet = h
            .service
            .resolve_or_create(RoomKind::SelfRoom, bob, vec![], None)
            .await
            .unwrap()
            .room
            .room
            .id;

        h.send_text(direct, alice, "one").await;
        let last = h.send_text(direct, alice, "two").await;

        let rooms = h.service.list_rooms(bob, 1, 20).await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room.room.id, direct);
        assert_eq!(rooms[0].last_message.as_ref().map(|m| m.id), Some(last.id));
        assert_eq!(rooms[0].unread_count, 2);
        assert_eq!(rooms[1].room.room.id, quiet);
        assert_eq!(rooms[1].unread_count, 0);
        assert!(rooms[1].last_message.is_none());

        let second_page = h.service.list_rooms(bob, 2, 1).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].room.room.id, quiet);

        assert!(matches!(
            h.service.list_rooms(bob, 0, 20).await,
            Err(ChatError::Validation { field: "page", .. })
        ));
        assert!(matches!(
            h.service.list_rooms(bob, 1, 500).await,
            Err(ChatError::Validation { field: "limit", .. })
        ));
    }
}
