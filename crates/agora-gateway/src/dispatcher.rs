use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use agora_chat::Broadcaster;
use agora_types::events::GatewayEvent;

/// Routes targeted events to every connected session of a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> sender). A user may hold several sessions.
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-session channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop one session's channel. Other sessions of the same user stay.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(sessions) = channels.get_mut(&user_id) {
            sessions.remove(&conn_id);
            if sessions.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to every session of a user. Returns how many
    /// sessions accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        let Some(sessions) = channels.get(&user_id) else {
            return 0;
        };
        sessions
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }

    pub async fn session_count(&self) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .values()
            .map(HashMap::len)
            .sum()
    }
}

#[async_trait]
impl Broadcaster for Dispatcher {
    async fn publish(&self, audience: &[Uuid], event: GatewayEvent) {
        let mut delivered = 0;
        for user_id in audience {
            delivered += self.send_to_user(*user_id, event.clone()).await;
        }
        trace!(
            "Event for room {:?} delivered to {} sessions of {} users",
            event.room_id(),
            delivered,
            audience.len()
        );
    }
}
