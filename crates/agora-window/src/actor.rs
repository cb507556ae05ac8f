use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use agora_types::api::MessagePage;
use agora_types::models::Message;

use crate::cache::{IndexRange, MemoryStats, WindowCache, WindowConfig, WindowState};
use crate::source::MessageSource;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollEvent {
    /// `position` is the scroll fraction in 0..=1.
    Scroll { position: f64, total_count: usize },
    ForceCleanup,
    Reset,
}

/// What a renderer needs after each change.
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    pub state: WindowState,
    pub memory: MemoryStats,
    /// Materialized messages inside the window, in index order.
    pub messages: Vec<Message>,
    /// Range currently being fetched, if any.
    pub loading: Option<IndexRange>,
}

/// Sending side of a running window actor. Dropping every handle stops it.
#[derive(Clone)]
pub struct WindowHandle {
    events: mpsc::Sender<ScrollEvent>,
    snapshots: watch::Receiver<WindowSnapshot>,
}

impl WindowHandle {
    pub async fn scroll(&self, position: f64, total_count: usize) -> Result<()> {
        self.send(ScrollEvent::Scroll {
            position,
            total_count,
        })
        .await
    }

    pub async fn force_cleanup(&self) -> Result<()> {
        self.send(ScrollEvent::ForceCleanup).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(ScrollEvent::Reset).await
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WindowSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, event: ScrollEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("window actor has stopped"))
    }
}

struct FetchDone {
    range: IndexRange,
    result: Result<MessagePage>,
}

/// Spawn the actor owning a room's window cache. Scroll events are
/// debounced; fetches run concurrently and land back on the actor, where a
/// result is applied only if its range still equals the required range.
/// A failed fetch is retried once, one debounce interval later.
pub fn spawn_window(
    room_id: Uuid,
    config: WindowConfig,
    source: Arc<dyn MessageSource>,
) -> WindowHandle {
    let (events_tx, events_rx) = mpsc::channel(64);
    let (snapshots_tx, snapshots_rx) = watch::channel(WindowSnapshot::default());

    let actor = WindowActor {
        room_id,
        cache: WindowCache::new(config),
        source,
        snapshots: snapshots_tx,
        in_flight: None,
        retry: None,
        retried: None,
        last_position: 0.0,
    };
    tokio::spawn(actor.run(events_rx));

    WindowHandle {
        events: events_tx,
        snapshots: snapshots_rx,
    }
}

struct WindowActor {
    room_id: Uuid,
    cache: WindowCache,
    source: Arc<dyn MessageSource>,
    snapshots: watch::Sender<WindowSnapshot>,
    in_flight: Option<IndexRange>,
    /// Failed range waiting for its retry tick.
    retry: Option<IndexRange>,
    /// Range that already used its retry.
    retried: Option<IndexRange>,
    last_position: f64,
}

impl WindowActor {
    async fn run(mut self, mut events: mpsc::Receiver<ScrollEvent>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<FetchDone>();
        let debounce = self.cache.config().debounce;
        let mut pending: Option<(f64, usize)> = None;
        let deadline = time::sleep(debounce);
        let retry_at = time::sleep(debounce);
        tokio::pin!(deadline, retry_at);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ScrollEvent::Scroll { position, total_count }) => {
                        pending = Some((position, total_count));
                        deadline.as_mut().reset(Instant::now() + debounce);
                    }
                    Some(ScrollEvent::ForceCleanup) => {
                        self.cache.force_cleanup();
                        self.publish();
                    }
                    Some(ScrollEvent::Reset) => {
                        pending = None;
                        self.in_flight = None;
                        self.retry = None;
                        self.retried = None;
                        self.cache.reset();
                        self.publish();
                    }
                    None => break,
                },
                _ = &mut deadline, if pending.is_some() => {
                    if let Some((position, total_count)) = pending.take() {
                        self.apply_scroll(position, total_count, &done_tx);
                    }
                }
                _ = &mut retry_at, if self.retry.is_some() => self.retry_fetch(&done_tx),
                Some(done) = done_rx.recv() => {
                    if self.apply_fetch(done, &done_tx) {
                        retry_at.as_mut().reset(Instant::now() + debounce);
                    }
                }
            }
        }

        debug!("Window actor for room {} stopped", self.room_id);
    }

    fn apply_scroll(
        &mut self,
        position: f64,
        total_count: usize,
        done_tx: &mpsc::UnboundedSender<FetchDone>,
    ) {
        self.last_position = position;
        // A fresh scroll earns a fresh retry.
        self.retry = None;
        self.retried = None;
        self.cache.update_window(position, total_count);
        self.request_missing(done_tx);
        self.publish();
    }

    /// Returns true when a retry of the failed range was scheduled.
    fn apply_fetch(&mut self, done: FetchDone, done_tx: &mpsc::UnboundedSender<FetchDone>) -> bool {
        if self.in_flight == Some(done.range) {
            self.in_flight = None;
        }

        let page = match done.result {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "Fetching [{}, {}) for room {} failed: {}",
                    done.range.start, done.range.end, self.room_id, e
                );
                let retry = self.cache.required_range() == Some(done.range)
                    && self.retried != Some(done.range);
                if retry {
                    self.retry = Some(done.range);
                }
                self.publish();
                return retry;
            }
        };

        if self.cache.required_range() != Some(done.range) {
            debug!(
                "Discarding superseded fetch [{}, {})",
                done.range.start, done.range.end
            );
            return false;
        }
        self.retried = None;

        let accepted = self.cache.add_messages(page.messages, done.range.start);
        trace!("Applied {} messages at {}", accepted, done.range.start);

        let total = usize::try_from(page.total).unwrap_or(usize::MAX);
        if total != self.cache.state().total_count {
            self.cache.update_window(self.last_position, total);
        }

        self.request_missing(done_tx);
        self.publish();
        false
    }

    fn retry_fetch(&mut self, done_tx: &mpsc::UnboundedSender<FetchDone>) {
        let Some(range) = self.retry.take() else {
            return;
        };
        // A scroll since the failure already moved on or refetched.
        if self.in_flight.is_some() || self.cache.required_range() != Some(range) {
            return;
        }

        debug!(
            "Retrying fetch [{}, {}) for room {}",
            range.start, range.end, self.room_id
        );
        self.retried = Some(range);
        self.request_missing(done_tx);
        self.publish();
    }

    /// Start a fetch for the required range unless that exact range is
    /// already in flight.
    fn request_missing(&mut self, done_tx: &mpsc::UnboundedSender<FetchDone>) {
        let Some(range) = self.cache.required_range() else {
            return;
        };
        if self.in_flight == Some(range) {
            return;
        }
        self.in_flight = Some(range);

        let source = self.source.clone();
        let room_id = self.room_id;
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch(room_id, range.start, range.len()).await;
            // The actor may be gone; nothing left to update then.
            let _ = done_tx.send(FetchDone { range, result });
        });
    }

    fn publish(&self) {
        self.snapshots.send_replace(WindowSnapshot {
            state: self.cache.state(),
            memory: self.cache.memory(),
            messages: self
                .cache
                .window_messages()
                .map(|(_, m)| m.clone())
                .collect(),
            loading: self.in_flight,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::bail;
    use async_trait::async_trait;

    use crate::cache::tests::message;

    use super::*;

    struct FakeSource {
        total: usize,
        delay: Duration,
        failures: Mutex<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeSource {
        fn new(total: usize, delay: Duration) -> Arc<Self> {
            Self::failing(total, delay, 0)
        }

        /// A source whose first `failures` fetches error out.
        fn failing(total: usize, delay: Duration, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                total,
                delay,
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(usize, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn fetch(&self, _room_id: Uuid, offset: usize, limit: usize) -> Result<MessagePage> {
            self.calls.lock().unwrap().push((offset, limit));
            time::sleep(self.delay).await;
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    bail!("connection reset");
                }
            }
            let end = (offset + limit).min(self.total);
            Ok(MessagePage {
                total: self.total as u64,
                offset: offset as u64,
                messages: (offset..end).map(message).collect(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_burst_is_debounced_into_one_fetch() {
        let source = FakeSource::new(1000, Duration::ZERO);
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        for position in [0.1, 0.2, 0.3, 0.5] {
            handle.scroll(position, 1000).await.unwrap();
        }

        let mut rx = handle.subscribe();
        let snapshot = rx
            .wait_for(|s| s.messages.len() == 50)
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.state.start_index, 475);
        assert_eq!(snapshot.messages[0].content, "message 475");
        assert_eq!(snapshot.loading, None);
        assert_eq!(source.calls(), vec![(475, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_fetch_is_discarded() {
        let source = FakeSource::new(1000, Duration::from_millis(100));
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        handle.scroll(0.5, 1000).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;
        handle.scroll(0.9, 1000).await.unwrap();

        let mut rx = handle.subscribe();
        let snapshot = rx
            .wait_for(|s| s.state.start_index == 875 && s.messages.len() == 50)
            .await
            .unwrap()
            .clone();

        // Let the first fetch land as well.
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(snapshot.messages[0].content, "message 875");
        assert_eq!(source.calls(), vec![(475, 50), (875, 50)]);
        assert_eq!(handle.snapshot().memory.messages_in_memory, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn same_range_is_fetched_once() {
        let source = FakeSource::new(1000, Duration::from_millis(100));
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        handle.scroll(0.5, 1000).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;
        handle.scroll(0.5, 1000).await.unwrap();

        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.messages.len() == 50).await.unwrap();

        assert_eq!(source.calls(), vec![(475, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn reported_total_reshapes_the_window() {
        let source = FakeSource::new(300, Duration::ZERO);
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        // The caller's count is stale; the source knows better.
        handle.scroll(1.0, 320).await.unwrap();

        let mut rx = handle.subscribe();
        let snapshot = rx
            .wait_for(|s| s.state.total_count == 300 && s.messages.len() == 25)
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.state.end_index, 300);
        assert_eq!(snapshot.messages.last().unwrap().content, "message 299");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_is_retried_on_the_next_tick() {
        let source = FakeSource::failing(1000, Duration::ZERO, 1);
        let config = WindowConfig::default();
        let debounce = config.debounce;
        let handle = spawn_window(Uuid::new_v4(), config, source.clone());

        handle.scroll(0.5, 1000).await.unwrap();
        time::sleep(debounce + Duration::from_millis(1)).await;
        assert_eq!(source.calls().len(), 1);
        assert!(handle.snapshot().messages.is_empty());

        let mut rx = handle.subscribe();
        let snapshot = rx
            .wait_for(|s| s.messages.len() == 50)
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.messages[0].content, "message 475");
        assert_eq!(snapshot.loading, None);
        assert_eq!(source.calls(), vec![(475, 50), (475, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failure_waits_for_the_next_scroll() {
        let source = FakeSource::failing(1000, Duration::ZERO, 2);
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        handle.scroll(0.5, 1000).await.unwrap();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(source.calls(), vec![(475, 50), (475, 50)]);
        let stalled = handle.snapshot();
        assert_eq!(stalled.loading, None);
        assert!(stalled.messages.is_empty());
        assert_eq!(stalled.state.start_index, 475);

        // The source has recovered; scrolling asks again.
        handle.scroll(0.5, 1000).await.unwrap();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.messages.len() == 50).await.unwrap();
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_cleanup_reach_the_cache() {
        let source = FakeSource::new(1000, Duration::ZERO);
        let handle = spawn_window(Uuid::new_v4(), WindowConfig::default(), source.clone());

        handle.scroll(0.5, 1000).await.unwrap();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.messages.len() == 50).await.unwrap();

        handle.scroll(0.56, 1000).await.unwrap();
        rx.wait_for(|s| s.state.start_index == 535 && s.messages.len() == 50)
            .await
            .unwrap();
        handle.force_cleanup().await.unwrap();
        // Only [525, 595) survives; the cap had already trimmed the rest to 70.
        rx.wait_for(|s| s.memory.messages_in_memory == 50)
            .await
            .unwrap();

        handle.reset().await.unwrap();
        let cleared = rx
            .wait_for(|s| s.state == WindowState::default())
            .await
            .unwrap()
            .clone();
        assert_eq!(cleared.memory.messages_in_memory, 0);
        assert!(cleared.messages.is_empty());
    }
}
