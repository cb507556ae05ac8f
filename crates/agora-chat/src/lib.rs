//! Agora messaging core.
//!
//! - Deletion decision engine: soft-hide vs hard-remove based on authorship
//!   and whether any other participant has read the message
//! - Read-receipt tracker with monotonic upserts
//! - Race-free room resolution for direct/self rooms
//! - Bulk unread counts for room lists
//!
//! All storage goes through `agora_db::Database`; file storage, file
//! security and push fan-out are collaborators behind traits.

pub mod clock;
pub mod collaborators;
pub mod deletion;
pub mod error;
pub mod messages;
pub mod receipts;
pub mod rooms;
pub mod unread;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use agora_db::Database;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    Broadcaster, ExtensionAllowlist, FileSecurity, FileStore, FileVerdict, LocalFileStore,
    NoopBroadcaster,
};
pub use deletion::DeleteOutcome;
pub use error::{ChatError, ChatResult};
pub use messages::NewMessage;
pub use receipts::{MarkReadAck, ReadNotice};
pub use rooms::RoomResolution;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Upper bound on receipts returned by `list_receipts`.
    pub receipt_list_limit: u32,
    pub max_content_len: usize,
    pub max_page_size: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            receipt_list_limit: 50,
            max_content_len: 4000,
            max_page_size: 200,
        }
    }
}

/// Entry point for every messaging operation. Cheap to clone.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    files: Arc<dyn FileStore>,
    security: Arc<dyn FileSecurity>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        files: Arc<dyn FileStore>,
        security: Arc<dyn FileSecurity>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            db,
            files,
            security,
            broadcaster,
            clock: Arc::new(SystemClock),
            config: ChatConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Storage(anyhow!("blocking task failed: {}", e))
            })?
    }
}
