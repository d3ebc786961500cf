//! Bounded message buffer with long-poll waiters.
//!
//! The buffer keeps a replay window of the most recent messages and a set of
//! pending waiters. `publish` resolves every pending waiter with the new batch
//! and appends it to the window; `wait` either answers from the window or
//! registers a new waiter; `cancel` releases a waiter the caller gave up on.
//!
//! The window and the waiter set live behind one mutex, so each operation is a
//! single critical section. None of the operations suspend; only the caller
//! awaiting a [`WaitHandle`] does.

use crate::message::Message;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

/// Default number of messages kept for catch-up.
pub const DEFAULT_CACHE_SIZE: usize = 200;

/// A batch of messages delivered to a reader.
///
/// Shared between all waiters resolved by the same publish.
pub type Batch = Arc<[Message]>;

/// Identifier of a registered waiter, unique within one buffer.
pub type WaiterId = u64;

fn empty_batch() -> Batch {
    Arc::from(Vec::new())
}

/// Buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum number of messages retained for catch-up.
    pub cache_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Handle returned by [`MessageBuffer::wait`].
///
/// Awaiting the handle yields the batch it was resolved with. A handle built
/// from the replay window is ready immediately; a pending one resolves on the
/// next publish, or with an empty batch when cancelled.
#[derive(Debug)]
#[must_use = "a pending handle must be awaited or cancelled"]
pub struct WaitHandle {
    id: Option<WaiterId>,
    inner: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(Option<Batch>),
    Pending(oneshot::Receiver<Batch>),
}

impl WaitHandle {
    fn ready(batch: Batch) -> Self {
        Self {
            id: None,
            inner: HandleState::Ready(Some(batch)),
        }
    }

    fn pending(id: WaiterId, rx: oneshot::Receiver<Batch>) -> Self {
        Self {
            id: Some(id),
            inner: HandleState::Pending(rx),
        }
    }

    /// The waiter id, or `None` if the handle was answered from the cache.
    #[must_use]
    pub fn id(&self) -> Option<WaiterId> {
        self.id
    }

    /// Whether the handle was answered from the cache without registering.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, HandleState::Ready(_))
    }
}

impl Future for WaitHandle {
    type Output = Batch;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            HandleState::Ready(batch) => Poll::Ready(batch.take().unwrap_or_else(empty_batch)),
            // A dropped sender means the buffer itself went away; treat it as
            // "no new messages".
            HandleState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or_else(|_| empty_batch())),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    cache: VecDeque<Message>,
    waiters: HashMap<WaiterId, oneshot::Sender<Batch>>,
    next_waiter: WaiterId,
    published_total: u64,
}

impl State {
    fn register(&mut self) -> WaitHandle {
        let id = self.next_waiter;
        self.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        WaitHandle::pending(id, rx)
    }

    /// Messages newer than `cursor`, or `None` if the cursor is not cached.
    fn newer_than(&self, cursor: &str) -> Option<Vec<Message>> {
        let pos = self.cache.iter().rposition(|m| m.id.as_str() == cursor)?;
        Some(self.cache.range(pos + 1..).cloned().collect())
    }
}

/// The long-poll message buffer.
///
/// Construct one per independent stream and share it behind an [`Arc`].
#[derive(Debug)]
pub struct MessageBuffer {
    state: Mutex<State>,
    config: BufferConfig,
}

impl MessageBuffer {
    /// Create a buffer with the default cache size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    /// Create a buffer holding at most `cache_size` messages.
    #[must_use]
    pub fn with_cache_size(cache_size: usize) -> Self {
        Self::with_config(BufferConfig { cache_size })
    }

    /// Create a buffer with custom configuration.
    #[must_use]
    pub fn with_config(config: BufferConfig) -> Self {
        info!(cache_size = config.cache_size, "Creating message buffer");
        Self {
            state: Mutex::new(State {
                cache: VecDeque::with_capacity(config.cache_size),
                ..State::default()
            }),
            config,
        }
    }

    /// Wait for messages after `cursor`.
    ///
    /// If `cursor` is found in the cache the handle is ready immediately with
    /// every newer message, which is an empty batch when the cursor is the
    /// newest message. Without a cursor, or with one that is no longer cached,
    /// a pending waiter is registered and resolved by the next publish.
    pub fn wait(&self, cursor: Option<&str>) -> WaitHandle {
        self.wait_inner(cursor, false)
    }

    /// Like [`wait`](Self::wait), but a cursor pointing at the newest cached
    /// message blocks instead of returning an empty batch.
    ///
    /// Long-poll transports use this so an up-to-date reader does not spin.
    pub fn wait_newer(&self, cursor: Option<&str>) -> WaitHandle {
        self.wait_inner(cursor, true)
    }

    fn wait_inner(&self, cursor: Option<&str>, block_at_newest: bool) -> WaitHandle {
        let mut state = self.state.lock();

        if let Some(cursor) = cursor {
            match state.newer_than(cursor) {
                Some(newer) if !(block_at_newest && newer.is_empty()) => {
                    trace!(cursor = %cursor, count = newer.len(), "Answered wait from cache");
                    return WaitHandle::ready(Arc::from(newer));
                }
                Some(_) => {}
                None => debug!(cursor = %cursor, "Cursor not in cache, blocking"),
            }
        }

        let handle = state.register();
        debug!(
            waiter = ?handle.id(),
            waiters = state.waiters.len(),
            "Registered waiter"
        );
        handle
    }

    /// Publish a batch of messages.
    ///
    /// Every pending waiter is resolved with the whole batch, then the batch
    /// is appended to the cache and the oldest entries are evicted down to
    /// the cache size. An empty batch is ignored.
    ///
    /// Returns the number of waiters that were resolved.
    pub fn publish(&self, messages: Vec<Message>) -> usize {
        if messages.is_empty() {
            return 0;
        }

        let batch: Batch = Arc::from(messages);
        let mut state = self.state.lock();

        let resolved = state.waiters.len();
        for (_, tx) in state.waiters.drain() {
            // The receiver may already be gone; nothing to deliver then.
            let _ = tx.send(Arc::clone(&batch));
        }

        state.cache.extend(batch.iter().cloned());
        let excess = state.cache.len().saturating_sub(self.config.cache_size);
        state.cache.drain(..excess);
        state.published_total += batch.len() as u64;

        trace!(
            messages = batch.len(),
            resolved,
            cached = state.cache.len(),
            "Published batch"
        );
        resolved
    }

    /// Publish a single message.
    pub fn publish_one(&self, message: Message) -> usize {
        self.publish(vec![message])
    }

    /// Cancel a handle returned by [`wait`](Self::wait).
    ///
    /// Returns `true` if the waiter was still pending; it is then resolved
    /// with an empty batch. Cancelling a ready, already resolved or already
    /// cancelled handle does nothing.
    pub fn cancel(&self, handle: &WaitHandle) -> bool {
        handle.id().is_some_and(|id| self.cancel_waiter(id))
    }

    /// Cancel a waiter by id. See [`cancel`](Self::cancel).
    pub fn cancel_waiter(&self, id: WaiterId) -> bool {
        let removed = self.state.lock().waiters.remove(&id);
        match removed {
            Some(tx) => {
                let _ = tx.send(empty_batch());
                debug!(waiter = id, "Cancelled waiter");
                true
            }
            None => false,
        }
    }

    /// Maximum number of cached messages.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.config.cache_size
    }

    /// Number of cached messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().cache.is_empty()
    }

    /// Number of pending waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Copy of the cached messages, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.state.lock().cache.iter().cloned().collect()
    }

    /// Get buffer statistics.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            cached: state.cache.len(),
            waiters: state.waiters.len(),
            cache_size: self.config.cache_size,
            published_total: state.published_total,
        }
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer statistics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BufferStats {
    /// Number of cached messages.
    pub cached: usize,
    /// Number of pending waiters.
    pub waiters: usize,
    /// Configured cache capacity.
    pub cache_size: usize,
    /// Total messages published since creation.
    pub published_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ids(batch: &[Message]) -> Vec<&str> {
        batch.iter().map(|m| m.id.as_str()).collect()
    }

    fn seeded(cache_size: usize, names: &[&str]) -> MessageBuffer {
        let buffer = MessageBuffer::with_cache_size(cache_size);
        for name in names {
            buffer.publish_one(Message::with_id(*name, format!("body {name}")));
        }
        buffer
    }

    #[test]
    fn test_default_cache_size() {
        assert_eq!(MessageBuffer::new().cache_size(), 200);
    }

    #[test]
    fn test_cache_never_exceeds_capacity() {
        let buffer = MessageBuffer::with_cache_size(5);
        for i in 0..20 {
            buffer.publish_one(Message::new(format!("msg {i}")));
            assert!(buffer.len() <= 5);
        }
        buffer.publish((0..12).map(|i| Message::new(i.to_string())).collect());
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.stats().published_total, 32);
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let buffer = seeded(2, &["m1", "m2", "m3"]);
        assert_eq!(ids(&buffer.snapshot()), vec!["m2", "m3"]);

        let handle = buffer.wait(Some("m1"));
        assert!(!handle.is_ready());
        assert_eq!(buffer.waiter_count(), 1);
    }

    #[tokio::test]
    async fn test_cursor_catch_up() {
        let buffer = seeded(200, &["m1", "m2", "m3"]);

        let handle = buffer.wait(Some("m1"));
        assert!(handle.is_ready());
        assert_eq!(buffer.waiter_count(), 0);
        assert_eq!(ids(&handle.await), vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_cursor_at_newest_returns_empty() {
        let buffer = seeded(200, &["m1", "m2", "m3"]);

        let handle = buffer.wait(Some("m3"));
        assert!(handle.is_ready());
        assert!(handle.await.is_empty());
        assert_eq!(buffer.waiter_count(), 0);
    }

    #[test]
    fn test_wait_newer_blocks_at_newest() {
        let buffer = seeded(200, &["m1", "m2"]);

        let handle = buffer.wait_newer(Some("m2"));
        assert!(!handle.is_ready());
        assert_eq!(buffer.waiter_count(), 1);

        let handle = buffer.wait_newer(Some("m1"));
        assert!(handle.is_ready());
    }

    #[test]
    fn test_unknown_cursor_blocks() {
        let buffer = seeded(200, &["m1"]);

        let handle = buffer.wait(Some("unknown-id"));
        assert!(!handle.is_ready());
        assert!(handle.id().is_some());
        assert_eq!(buffer.waiter_count(), 1);

        let _second = buffer.wait(None);
        assert_eq!(buffer.waiter_count(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_resolves_all_waiters() {
        let buffer = MessageBuffer::new();
        let handles: Vec<_> = (0..5).map(|_| buffer.wait(None)).collect();
        assert_eq!(buffer.waiter_count(), 5);

        let resolved = buffer.publish(vec![Message::with_id("x", "1"), Message::with_id("y", "2")]);
        assert_eq!(resolved, 5);
        assert_eq!(buffer.waiter_count(), 0);

        for handle in handles {
            assert_eq!(ids(&handle.await), vec!["x", "y"]);
        }
    }

    #[tokio::test]
    async fn test_end_to_end_publish() {
        let buffer = MessageBuffer::new();
        let before = buffer.wait(None);

        buffer.publish_one(Message::with_id("a", "hi"));
        let after = buffer.wait(None);

        let batch = before.await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id.as_str(), "a");
        assert_eq!(batch[0].body, "hi");

        // The late waiter is still pending until the next publish.
        assert!(!after.is_ready());
        assert_eq!(buffer.waiter_count(), 1);
        buffer.publish_one(Message::with_id("b", "again"));
        assert_eq!(ids(&after.await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_cancel_resolves_with_empty_batch() {
        let buffer = MessageBuffer::new();
        let handle = buffer.wait(None);

        assert!(buffer.cancel(&handle));
        assert_eq!(buffer.waiter_count(), 0);
        assert!(handle.await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let buffer = MessageBuffer::new();
        let handle = buffer.wait(None);

        assert!(buffer.cancel(&handle));
        assert!(!buffer.cancel(&handle));
        assert!(handle.await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_publish_is_noop() {
        let buffer = MessageBuffer::new();
        let handle = buffer.wait(None);

        buffer.publish_one(Message::with_id("a", "hi"));
        assert!(!buffer.cancel(&handle));
        assert_eq!(ids(&handle.await), vec!["a"]);
    }

    #[test]
    fn test_cancel_ready_handle_is_noop() {
        let buffer = seeded(200, &["m1", "m2"]);
        let handle = buffer.wait(Some("m1"));

        assert!(handle.id().is_none());
        assert!(!buffer.cancel(&handle));
    }

    #[test]
    fn test_publish_to_dropped_waiter() {
        let buffer = MessageBuffer::new();
        drop(buffer.wait(None));

        assert_eq!(buffer.publish_one(Message::new("hi")), 1);
        assert_eq!(buffer.waiter_count(), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_empty_publish_is_ignored() {
        let buffer = MessageBuffer::new();
        let _handle = buffer.wait(None);

        assert_eq!(buffer.publish(Vec::new()), 0);
        assert_eq!(buffer.waiter_count(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let buffer = seeded(0, &["m1", "m2"]);
        assert!(buffer.is_empty());
        assert!(!buffer.wait(Some("m2")).is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_and_publishers() {
        let buffer = Arc::new(MessageBuffer::with_cache_size(16));

        let readers: Vec<_> = (0..32)
            .map(|_| {
                let handle = buffer.wait(None);
                tokio::spawn(async move { handle.await })
            })
            .collect();

        let publishers: Vec<_> = (0..4)
            .map(|i| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    for j in 0..10 {
                        buffer.publish_one(Message::new(format!("{i}-{j}")));
                    }
                })
            })
            .collect();

        for publisher in publishers {
            publisher.await.unwrap();
        }
        for reader in readers {
            let batch = tokio::time::timeout(Duration::from_secs(5), reader)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(batch.len(), 1);
        }

        assert_eq!(buffer.waiter_count(), 0);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.stats().published_total, 40);
    }
}
