//! Shared fixtures for the service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use agora_db::Database;
use agora_types::events::GatewayEvent;
use agora_types::models::{FileRef, Message, MessageKind, Participant, Room, RoomKind};

use crate::{Broadcaster, ChatService, Clock, ExtensionAllowlist, FileStore, ManualClock, NewMessage};

#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    events: Mutex<Vec<(Vec<Uuid>, GatewayEvent)>>,
}

impl RecordingBroadcaster {
    /// Drain everything published so far.
    pub fn take(&self) -> Vec<(Vec<Uuid>, GatewayEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, audience: &[Uuid], event: GatewayEvent) {
        self.events.lock().unwrap().push((audience.to_vec(), event));
    }
}

/// Records deleted keys; the next `failures` calls fail instead.
#[derive(Default)]
pub(crate) struct MemoryFileStore {
    deleted: Mutex<Vec<String>>,
    failures: AtomicUsize,
}

impl MemoryFileStore {
    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn delete_object(&self, object_key: &str) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("object store unavailable");
        }
        self.deleted.lock().unwrap().push(object_key.to_string());
        Ok(())
    }
}

pub(crate) struct Harness {
    pub service: ChatService,
    pub clock: Arc<ManualClock>,
    pub broadcasts: Arc<RecordingBroadcaster>,
    pub files: Arc<MemoryFileStore>,
}

pub(crate) fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap()
}

pub(crate) fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(start()));
    let broadcasts = Arc::new(RecordingBroadcaster::default());
    let files = Arc::new(MemoryFileStore::default());

    let service = ChatService::new(
        db,
        files.clone(),
        Arc::new(ExtensionAllowlist::default()),
        broadcasts.clone(),
    )
    .with_clock(clock.clone());

    Harness {
        service,
        clock,
        broadcasts,
        files,
    }
}

impl Harness {
    pub fn db(&self) -> &Database {
        self.service.db()
    }

    pub fn tick(&self) {
        self.clock.advance(Duration::seconds(1));
    }

    /// Insert a group room directly, bypassing resolution.
    pub fn group(&self, members: &[Uuid]) -> Uuid {
        let now = self.clock.now();
        let room = Room {
            id: Uuid::new_v4(),
            kind: RoomKind::Group,
            name: Some("fixture".into()),
            created_at: now,
        };
        let participants: Vec<Participant> = members
            .iter()
            .map(|user_id| Participant {
                room_id: room.id,
                user_id: *user_id,
                joined_at: now,
                is_admin: false,
            })
            .collect();
        self.db()
            .with_tx::<_, _, anyhow::Error>(|tx| {
                tx.insert_room(&room, None)?;
                tx.insert_participants(&participants)
            })
            .unwrap();
        room.id
    }

    /// Advance the clock one second and send a text message.
    pub async fn send_text(&self, room_id: Uuid, sender: Uuid, content: &str) -> Message {
        self.tick();
        self.service
            .send_message(sender, room_id, NewMessage::text(content))
            .await
            .unwrap()
    }

    pub async fn send_image(&self, room_id: Uuid, sender: Uuid, object_key: &str) -> Message {
        self.tick();
        self.service
            .send_message(
                sender,
                room_id,
                NewMessage {
                    content: String::new(),
                    kind: MessageKind::Image,
                    file: Some(FileRef {
                        object_key: object_key.into(),
                        file_name: "photo.png".into(),
                    }),
                },
            )
            .await
            .unwrap()
    }
}
