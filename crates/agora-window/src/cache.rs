use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::time::Duration;

use tracing::{debug, trace};
use uuid::Uuid;

use agora_types::models::Message;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Number of indices kept around the scroll center.
    pub window_size: usize,
    /// Slack on each side of the window before a message starts aging out.
    pub buffer_size: usize,
    /// Consecutive updates a message may spend outside the buffered window
    /// before it is evicted.
    pub cleanup_threshold: u32,
    pub debounce: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            buffer_size: 10,
            cleanup_threshold: 3,
            debounce: Duration::from_millis(16),
        }
    }
}

impl WindowConfig {
    /// Upper bound on materialized messages.
    pub fn max_materialized(&self) -> usize {
        self.window_size + 2 * self.buffer_size
    }
}

/// Half-open index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

/// Current window bounds. `end_index` is exclusive and never exceeds
/// `total_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowState {
    pub start_index: usize,
    pub end_index: usize,
    pub total_count: usize,
}

impl WindowState {
    pub fn range(&self) -> IndexRange {
        IndexRange {
            start: self.start_index,
            end: self.end_index,
        }
    }
}

/// Observability only; nothing in the cache depends on these numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStats {
    pub messages_in_memory: usize,
    pub total_count: usize,
    /// `1 - messages_in_memory / total_count`, or 0 for an empty room.
    pub compression_ratio: f64,
    pub estimated_bytes: usize,
}

struct Slot {
    message: Message,
    /// Consecutive updates spent outside the buffered window.
    strikes: u32,
}

/// Index-addressed cache of a room's messages around the scroll position.
///
/// Indices are positions in the room's visible, oldest-first message list.
/// Only a band of `window_size + 2 * buffer_size` messages is ever kept.
pub struct WindowCache {
    config: WindowConfig,
    state: WindowState,
    slots: BTreeMap<usize, Slot>,
    index_of: HashMap<Uuid, usize>,
}

impl WindowCache {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            state: WindowState::default(),
            slots: BTreeMap::new(),
            index_of: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Recenter the window on `scroll_position` (0..=1) of `total_count`
    /// messages and age everything outside the buffered window.
    pub fn update_window(&mut self, scroll_position: f64, total_count: usize) -> WindowState {
        let position = if scroll_position.is_finite() {
            scroll_position.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let center = (position * total_count as f64).round() as usize;
        let half = self.config.window_size / 2;

        self.state = WindowState {
            start_index: center.saturating_sub(half).min(total_count),
            end_index: center.saturating_add(half).min(total_count),
            total_count,
        };

        self.truncate(total_count);
        self.age_slots();
        self.enforce_cap();

        trace!(
            "Window [{}, {}) of {} ({} materialized)",
            self.state.start_index,
            self.state.end_index,
            total_count,
            self.slots.len()
        );
        self.state
    }

    /// Store `batch` at consecutive indices starting at `start_index`.
    /// Messages past the known total are dropped. Returns how many were kept.
    pub fn add_messages(&mut self, batch: Vec<Message>, start_index: usize) -> usize {
        let mut accepted = 0;
        for (offset, message) in batch.into_iter().enumerate() {
            let index = start_index + offset;
            if index >= self.state.total_count {
                debug!(
                    "Dropping message at index {} beyond total {}",
                    index, self.state.total_count
                );
                break;
            }

            let id = message.id;
            if let Some(previous) = self.index_of.insert(id, index) {
                if previous != index {
                    self.slots.remove(&previous);
                }
            }
            if let Some(displaced) = self.slots.insert(index, Slot { message, strikes: 0 }) {
                if displaced.message.id != id {
                    self.index_of.remove(&displaced.message.id);
                }
            }
            accepted += 1;
        }

        self.enforce_cap();
        accepted
    }

    /// Whether the message is currently materialized.
    pub fn is_in_window(&self, message_id: Uuid) -> bool {
        self.index_of.contains_key(&message_id)
    }

    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.slots.get(&index).map(|slot| &slot.message)
    }

    /// Materialized messages inside the window, in index order.
    pub fn window_messages(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.slots
            .range(self.state.start_index..self.state.end_index)
            .map(|(index, slot)| (*index, &slot.message))
    }

    /// Smallest contiguous range covering every missing index inside the
    /// window, or `None` when the window is fully materialized.
    pub fn required_range(&self) -> Option<IndexRange> {
        let window = self.state.start_index..self.state.end_index;
        let first = window.clone().find(|i| !self.slots.contains_key(i))?;
        let last = window.rev().find(|i| !self.slots.contains_key(i))?;
        Some(IndexRange {
            start: first,
            end: last + 1,
        })
    }

    /// Evict everything outside the buffered window right away. Returns the
    /// number of evicted messages.
    pub fn force_cleanup(&mut self) -> usize {
        let keep = self.retention_range();
        let before = self.slots.len();
        let index_of = &mut self.index_of;
        self.slots.retain(|index, slot| {
            let kept = keep.contains(*index);
            if !kept {
                index_of.remove(&slot.message.id);
            }
            kept
        });
        let evicted = before - self.slots.len();
        if evicted > 0 {
            debug!("Force cleanup evicted {} messages", evicted);
        }
        evicted
    }

    pub fn reset(&mut self) {
        self.state = WindowState::default();
        self.slots.clear();
        self.index_of.clear();
    }

    pub fn memory(&self) -> MemoryStats {
        let messages_in_memory = self.slots.len();
        let total_count = self.state.total_count;
        let compression_ratio = if total_count == 0 {
            0.0
        } else {
            1.0 - messages_in_memory as f64 / total_count as f64
        };

        MemoryStats {
            messages_in_memory,
            total_count,
            compression_ratio,
            estimated_bytes: self
                .slots
                .values()
                .map(|slot| estimate_bytes(&slot.message))
                .sum(),
        }
    }

    fn retention_range(&self) -> IndexRange {
        IndexRange {
            start: self.state.start_index.saturating_sub(self.config.buffer_size),
            end: self.state.end_index.saturating_add(self.config.buffer_size),
        }
    }

    fn truncate(&mut self, total_count: usize) {
        let dropped = self.slots.split_off(&total_count);
        for slot in dropped.values() {
            self.index_of.remove(&slot.message.id);
        }
    }

    fn age_slots(&mut self) {
        let keep = self.retention_range();
        let threshold = self.config.cleanup_threshold;
        let index_of = &mut self.index_of;
        self.slots.retain(|index, slot| {
            if keep.contains(*index) {
                slot.strikes = 0;
                return true;
            }
            slot.strikes += 1;
            if slot.strikes > threshold {
                index_of.remove(&slot.message.id);
                return false;
            }
            true
        });
    }

    /// Drop the messages farthest from the window until the cap holds.
    fn enforce_cap(&mut self) {
        let cap = self.config.max_materialized();
        let center = (self.state.start_index + self.state.end_index) / 2;

        while self.slots.len() > cap {
            let (Some(first), Some(last)) = (
                self.slots.first_key_value().map(|(i, _)| *i),
                self.slots.last_key_value().map(|(i, _)| *i),
            ) else {
                break;
            };
            let victim = if center.abs_diff(first) >= center.abs_diff(last) {
                first
            } else {
                last
            };
            if let Some(slot) = self.slots.remove(&victim) {
                self.index_of.remove(&slot.message.id);
            }
        }
    }
}

fn estimate_bytes(message: &Message) -> usize {
    let file = message
        .file
        .as_ref()
        .map_or(0, |f| f.object_key.len() + f.file_name.len());
    mem::size_of::<Message>()
        + message.content.len()
        + message.hidden_for.len() * mem::size_of::<Uuid>()
        + file
}
