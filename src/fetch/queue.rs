//! Bounded-concurrency cancelable fetch scheduler.
//!
//! The queue is the scheduling core of the pipeline: an ordered,
//! deduplicated work list keyed by [`TileKey`], dispatching up to a
//! configured ceiling of concurrent fetches through the injected
//! [`TileFetcher`].
//!
//! ```text
//!   push(key) ──► pending list ──► dispatch (≤ ceiling) ──► fetcher.fetch
//!                    │                  │                        │
//!                  dedup             pause gate            select! vs token
//!                    │                                          │
//!                  handle ◄──── watch state + result slot ◄── settle
//! ```
//!
//! All bookkeeping is synchronous under one mutex that is never held
//! across an await; fetches run as spawned tasks and marshal their
//! outcome back through [`settle`](QueueShared::settle). Completion is
//! never delivered synchronously inside `push`/`pause`/`resume`/`reset`:
//! settling writes the shared result slot and signals a watch channel,
//! and waiters run as woken tasks afterwards.
//!
//! # Example
//!
//! ```ignore
//! let queue = FetchQueue::new(fetcher, FetchQueueConfig::default());
//! let mut handle = queue.push(TileKey::new(2, 0, 1));
//! let payload = handle.wait().await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::fetch::error::{FetchError, FetchResult};
use crate::fetch::fetcher::TileFetcher;
use crate::fetch::handle::FetchHandle;
use crate::fetch::state::FetchState;
use crate::key::TileKey;

/// Default dispatch ceiling: enough to saturate a typical tile service
/// without starving the rest of the host application's connections.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Tuning knobs for [`FetchQueue`].
#[derive(Debug, Clone)]
pub struct FetchQueueConfig {
    /// Maximum number of concurrently dispatched fetches.
    pub max_concurrent: usize,
}

impl Default for FetchQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl FetchQueueConfig {
    /// Set the dispatch ceiling.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// Pause/resume surface the reconciliation strategy drives around each
/// pass, so dispatch never races a wanted-set mutation.
pub trait DispatchGate: Send + Sync {
    /// Stop dispatching new fetches; in-flight work continues.
    fn pause(&self);

    /// Re-enable dispatch and refill the ceiling from the pending list.
    fn resume(&self);
}

/// Cumulative queue counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Entries created by `push`
    pub pushed: AtomicU64,
    /// Pushes that joined an existing live entry
    pub deduped: AtomicU64,
    /// Entries handed to the fetcher
    pub dispatched: AtomicU64,
    /// Entries settled with a payload
    pub completed: AtomicU64,
    /// Entries settled with a fetcher error
    pub failed: AtomicU64,
    /// Entries settled canceled
    pub canceled: AtomicU64,
    /// High-water mark of concurrent dispatches
    pub peak_in_flight: AtomicUsize,
}

impl QueueStats {
    /// Get a snapshot of current counters.
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`QueueStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub deduped: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
    pub peak_in_flight: usize,
}

struct Entry<P> {
    id: u64,
    state: FetchState,
    state_tx: watch::Sender<FetchState>,
    result: Arc<Mutex<Option<FetchResult<P>>>>,
    token: CancellationToken,
}

struct QueueState<P> {
    entries: HashMap<TileKey, Entry<P>>,
    // FIFO dispatch order. May contain stale (key, id) pairs for entries
    // canceled while pending; dispatch skips those by identity.
    pending: VecDeque<(TileKey, u64)>,
    in_flight: usize,
    paused: bool,
    closed: bool,
    next_id: u64,
}

pub(crate) struct QueueShared<P> {
    state: Mutex<QueueState<P>>,
    fetcher: Arc<dyn TileFetcher<P>>,
    max_concurrent: usize,
    stats: QueueStats,
}

impl<P: Clone + Send + 'static> QueueShared<P> {
    /// Fill free dispatch slots from the front of the pending list.
    ///
    /// Caller holds the state lock and passes it in; spawned tasks block
    /// on the same lock only after this caller releases it.
    fn dispatch_ready(shared: &Arc<Self>, state: &mut QueueState<P>) {
        loop {
            if state.paused || state.closed {
                return;
            }
            if state.in_flight >= shared.max_concurrent {
                return;
            }
            let Some((key, id)) = state.pending.pop_front() else {
                return;
            };
            let Some(entry) = state.entries.get_mut(&key) else {
                continue;
            };
            if entry.id != id || entry.state != FetchState::Pending {
                continue;
            }
            entry.state = FetchState::InFlight;
            let _ = entry.state_tx.send(FetchState::InFlight);
            let token = entry.token.clone();
            state.in_flight += 1;
            if state.in_flight > shared.stats.peak_in_flight.load(Ordering::Relaxed) {
                shared
                    .stats
                    .peak_in_flight
                    .store(state.in_flight, Ordering::Relaxed);
            }
            shared.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, in_flight = state.in_flight, "dispatching tile fetch");

            let task_shared = Arc::clone(shared);
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(FetchError::Canceled),
                    result = task_shared.fetcher.fetch(key) => result,
                };
                Self::settle(&task_shared, key, id, outcome);
            });
        }
    }

    /// Record a finished fetch and open its slot to the next entry.
    ///
    /// The entry-identity check discards late results for entries that
    /// were reset or canceled while the fetch ran; the slot itself is
    /// always freed, which is what allows a reset queue to refill only
    /// as the old work actually drains.
    fn settle(shared: &Arc<Self>, key: TileKey, id: u64, outcome: FetchResult<P>) {
        let mut state = shared.state.lock().unwrap();
        state.in_flight -= 1;
        let current = state.entries.get(&key).map(|e| e.id) == Some(id);
        if current {
            if let Some(entry) = state.entries.remove(&key) {
                shared.finish_entry(key, entry, outcome);
            }
        } else {
            trace!(key = %key, "discarding late result for superseded fetch");
        }
        Self::dispatch_ready(shared, &mut state);
    }
}

impl<P> QueueShared<P> {
    /// Settle one entry and publish its outcome. Caller has already
    /// removed it from the entry map.
    fn finish_entry(&self, key: TileKey, entry: Entry<P>, outcome: FetchResult<P>) {
        let final_state = match &outcome {
            Ok(_) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "tile fetch done");
                FetchState::Done
            }
            Err(FetchError::Canceled) => {
                self.stats.canceled.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "tile fetch canceled");
                FetchState::Canceled
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "tile fetch failed");
                FetchState::Failed
            }
        };
        *entry.result.lock().unwrap() = Some(outcome);
        let _ = entry.state_tx.send(final_state);
    }

    /// Cancel one entry by identity.
    ///
    /// The entry settles `Canceled` and leaves the map right away, so a
    /// later push for the same key starts a fresh fetch instead of
    /// joining a dying one. An in-flight task keeps its slot until it
    /// observes its token; its late result is discarded by the identity
    /// check in `settle`.
    pub(crate) fn cancel_entry(&self, key: TileKey, id: u64) {
        let mut state = self.state.lock().unwrap();
        match state.entries.get(&key) {
            Some(entry) if entry.id == id => {}
            _ => return,
        }
        let Some(entry) = state.entries.remove(&key) else {
            return;
        };
        if entry.state == FetchState::InFlight {
            entry.token.cancel();
        }
        self.finish_entry(key, entry, Err(FetchError::Canceled));
    }
}

/// Ordered, deduplicated, pausable fetch scheduler with a concurrency
/// ceiling.
///
/// Cheap to clone; all clones share the same queue. Methods that dispatch
/// (`push`, `resume`, and internal settling) spawn onto the ambient tokio
/// runtime and must run inside one.
pub struct FetchQueue<P> {
    shared: Arc<QueueShared<P>>,
}

impl<P> Clone for FetchQueue<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Clone + Send + 'static> FetchQueue<P> {
    /// Create a queue dispatching through `fetcher`.
    ///
    /// # Panics
    ///
    /// Panics when `config.max_concurrent` is zero.
    pub fn new(fetcher: Arc<dyn TileFetcher<P>>, config: FetchQueueConfig) -> Self {
        assert!(config.max_concurrent > 0, "max_concurrent must be > 0");
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    entries: HashMap::new(),
                    pending: VecDeque::new(),
                    in_flight: 0,
                    paused: false,
                    closed: false,
                    next_id: 1,
                }),
                fetcher,
                max_concurrent: config.max_concurrent,
                stats: QueueStats::default(),
            }),
        }
    }

    /// Enqueue a fetch for `key`, or join the live entry already queued
    /// for it.
    ///
    /// Dispatches immediately when unpaused and below the ceiling. After
    /// an entry settles, its key is free again and a later push starts a
    /// fresh fetch.
    pub fn push(&self, key: TileKey) -> FetchHandle<P> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            warn!(key = %key, "push on a cleared fetch queue");
            return FetchHandle::settled_canceled(key, Arc::clone(&self.shared));
        }
        if let Some(entry) = state.entries.get(&key) {
            self.shared.stats.deduped.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "joined existing tile fetch");
            return FetchHandle::new(
                key,
                entry.id,
                entry.state_tx.subscribe(),
                Arc::clone(&entry.result),
                Arc::clone(&self.shared),
            );
        }

        let id = state.next_id;
        state.next_id += 1;
        let (state_tx, state_rx) = watch::channel(FetchState::Pending);
        let result = Arc::new(Mutex::new(None));
        let handle = FetchHandle::new(
            key,
            id,
            state_rx,
            Arc::clone(&result),
            Arc::clone(&self.shared),
        );
        state.entries.insert(
            key,
            Entry {
                id,
                state: FetchState::Pending,
                state_tx,
                result,
                token: CancellationToken::new(),
            },
        );
        state.pending.push_back((key, id));
        self.shared.stats.pushed.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "queued tile fetch");
        QueueShared::dispatch_ready(&self.shared, &mut state);
        handle
    }

    /// True while a live (non-terminal) entry exists for `key`.
    pub fn has(&self, key: &TileKey) -> bool {
        self.shared.state.lock().unwrap().entries.contains_key(key)
    }

    /// Stop dispatching new fetches; in-flight work continues.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.paused {
            state.paused = true;
            trace!("fetch queue paused");
        }
    }

    /// Re-enable dispatch and refill the ceiling from the pending list.
    pub fn resume(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.paused {
            state.paused = false;
            trace!("fetch queue resumed");
        }
        QueueShared::dispatch_ready(&self.shared, &mut state);
    }

    /// True while dispatch is gated.
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().unwrap().paused
    }

    /// Cancel every entry and clear the work list.
    ///
    /// Pending and in-flight entries alike settle `Canceled` right away;
    /// results still in flight are discarded when they land. Slots held
    /// by in-flight fetches free up as those fetches actually finish, so
    /// a new generation of pushes starts dispatching as the old work
    /// drains.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let drained: Vec<(TileKey, Entry<P>)> = state.entries.drain().collect();
        state.pending.clear();
        let canceled = drained.len();
        for (key, entry) in drained {
            if entry.state == FetchState::InFlight {
                entry.token.cancel();
            }
            self.shared
                .finish_entry(key, entry, Err(FetchError::Canceled));
        }
        debug!(entries = canceled, "fetch queue reset");
    }

    /// [`reset`](Self::reset), then close the queue for good.
    ///
    /// Called on teardown; later pushes warn and settle `Canceled`
    /// immediately.
    pub fn clear(&self) {
        self.reset();
        let mut state = self.shared.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            debug!("fetch queue closed");
        }
    }

    /// Number of entries waiting for a dispatch slot.
    pub fn pending_count(&self) -> usize {
        let state = self.shared.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| e.state == FetchState::Pending)
            .count()
    }

    /// Number of currently dispatched fetches.
    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().unwrap().in_flight
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<P: Clone + Send + 'static> DispatchGate for FetchQueue<P> {
    fn pause(&self) {
        FetchQueue::pause(self);
    }

    fn resume(&self) {
        FetchQueue::resume(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Semaphore;

    /// Resolves immediately with a payload derived from the key.
    struct InstantFetcher;

    impl TileFetcher<String> for InstantFetcher {
        fn fetch<'a>(
            &'a self,
            key: TileKey,
        ) -> Pin<Box<dyn Future<Output = FetchResult<String>> + Send + 'a>> {
            Box::pin(async move { Ok(format!("tile:{}", key)) })
        }
    }

    /// Blocks each fetch on a semaphore permit and tracks concurrency.
    struct GatedFetcher {
        gate: Semaphore,
        started: AtomicUsize,
        current: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl GatedFetcher {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                started: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    impl TileFetcher<String> for GatedFetcher {
        fn fetch<'a>(
            &'a self,
            key: TileKey,
        ) -> Pin<Box<dyn Future<Output = FetchResult<String>> + Send + 'a>> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent.fetch_max(now, Ordering::SeqCst);
                let permit = self.gate.acquire().await.unwrap();
                permit.forget();
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(format!("tile:{}", key))
            })
        }
    }

    /// Fails every fetch.
    struct FailingFetcher;

    impl TileFetcher<String> for FailingFetcher {
        fn fetch<'a>(
            &'a self,
            _key: TileKey,
        ) -> Pin<Box<dyn Future<Output = FetchResult<String>> + Send + 'a>> {
            Box::pin(async move { Err(FetchError::failed("backend unavailable")) })
        }
    }

    async fn drain() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_push_completes_with_payload() {
        let queue = FetchQueue::new(Arc::new(InstantFetcher), FetchQueueConfig::default());
        let mut handle = queue.push(TileKey::new(2, 0, 1));
        assert_eq!(handle.wait().await.unwrap(), "tile:2/0/1");
        assert!(!queue.has(&TileKey::new(2, 0, 1)));
        let stats = queue.stats();
        assert_eq!(stats.pushed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_no_completion_inside_push() {
        // Current-thread runtime: the spawned fetch cannot have run yet,
        // so the handle must still be active right after push returns.
        let queue = FetchQueue::new(Arc::new(InstantFetcher), FetchQueueConfig::default());
        let mut handle = queue.push(TileKey::new(0, 0, 0));
        assert!(!handle.is_terminal());
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dedup_joins_live_entry() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default(),
        );
        let key = TileKey::new(3, 1, 1);
        let mut first = queue.push(key);
        let mut second = queue.push(key);
        drain().await;

        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
        let stats = queue.stats();
        assert_eq!(stats.pushed, 1);
        assert_eq!(stats.deduped, 1);

        fetcher.release(1);
        assert_eq!(first.wait().await.unwrap(), "tile:3/1/1");
        assert_eq!(second.wait().await.unwrap(), "tile:3/1/1");
        // One dispatch total.
        assert_eq!(queue.stats().dispatched, 1);
    }

    #[tokio::test]
    async fn test_refetch_after_terminal_is_fresh() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default(),
        );
        let key = TileKey::new(1, 0, 0);
        fetcher.release(1);
        let mut handle = queue.push(key);
        handle.wait().await.unwrap();
        assert!(!queue.has(&key));

        fetcher.release(1);
        let mut again = queue.push(key);
        again.wait().await.unwrap();
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().pushed, 2);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default().with_max_concurrent(2),
        );
        let handles: Vec<FetchHandle<String>> =
            (0..5).map(|col| queue.push(TileKey::new(4, 0, col))).collect();
        drain().await;

        // Only the ceiling's worth of fetches may be outstanding.
        assert_eq!(queue.in_flight_count(), 2);
        assert_eq!(queue.pending_count(), 3);
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);

        // Each settle opens the next slot.
        fetcher.release(1);
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 3);
        assert_eq!(queue.in_flight_count(), 2);

        fetcher.release(4);
        for mut handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(fetcher.max_concurrent.load(Ordering::SeqCst), 2);
        let stats = queue.stats();
        assert_eq!(stats.dispatched, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.peak_in_flight, 2);
    }

    #[tokio::test]
    async fn test_pause_gates_dispatch() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default(),
        );
        queue.pause();
        let mut handle = queue.push(TileKey::new(2, 0, 0));
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 0);
        assert_eq!(queue.in_flight_count(), 0);
        assert!(queue.has(&TileKey::new(2, 0, 0)));

        queue.resume();
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);

        fetcher.release(1);
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_never_dispatches() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default().with_max_concurrent(1),
        );
        let mut first = queue.push(TileKey::new(5, 0, 0));
        let mut second = queue.push(TileKey::new(5, 0, 1));
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);

        second.cancel();
        assert!(!queue.has(&TileKey::new(5, 0, 1)));
        assert_eq!(second.wait().await, Err(FetchError::Canceled));

        fetcher.release(1);
        first.wait().await.unwrap();
        drain().await;
        // The canceled entry never reached the fetcher.
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().canceled, 1);
    }

    #[tokio::test]
    async fn test_cancel_inflight_frees_key_for_fresh_push() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default(),
        );
        let key = TileKey::new(3, 2, 2);
        let mut first = queue.push(key);
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);

        // Canceling an in-flight entry settles it right away.
        first.cancel();
        assert!(!queue.has(&key));
        assert_eq!(first.wait().await, Err(FetchError::Canceled));

        // The key is free again: the next push is a fresh fetch, not a
        // join of the dying one.
        let mut second = queue.push(key);
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);
        fetcher.release(1);
        assert_eq!(second.wait().await.unwrap(), "tile:3/2/2");

        let stats = queue.stats();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.canceled, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_reset_discards_late_results() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default(),
        );
        let key = TileKey::new(6, 2, 3);
        let mut handle = queue.push(key);
        drain().await;
        assert_eq!(queue.in_flight_count(), 1);

        queue.reset();
        // Settles canceled immediately, without waiting for the fetch.
        assert_eq!(handle.wait().await, Err(FetchError::Canceled));
        assert!(!queue.has(&key));

        // Let the gated fetch finish; its payload must be discarded.
        fetcher.release(1);
        drain().await;
        assert_eq!(handle.result(), Some(Err(FetchError::Canceled)));
        assert_eq!(queue.in_flight_count(), 0);
        assert_eq!(queue.stats().completed, 0);
    }

    #[tokio::test]
    async fn test_reset_frees_slots_as_old_work_drains() {
        let fetcher = Arc::new(GatedFetcher::new());
        let queue = FetchQueue::new(
            Arc::clone(&fetcher) as Arc<dyn TileFetcher<String>>,
            FetchQueueConfig::default().with_max_concurrent(1),
        );
        let mut old = queue.push(TileKey::new(1, 0, 0));
        drain().await;
        queue.reset();
        assert_eq!(old.wait().await, Err(FetchError::Canceled));

        // The slot is still occupied until the canceled task settles, so
        // a new push stays pending rather than over-dispatching.
        let mut fresh = queue.push(TileKey::new(1, 0, 1));
        assert_eq!(queue.in_flight_count(), 1);
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);

        // The canceled fetch notices its token promptly and frees the slot.
        drain().await;
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);
        fetcher.release(1);
        assert_eq!(fresh.wait().await.unwrap(), "tile:1/0/1");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        struct MixedFetcher;

        impl TileFetcher<String> for MixedFetcher {
            fn fetch<'a>(
                &'a self,
                key: TileKey,
            ) -> Pin<Box<dyn Future<Output = FetchResult<String>> + Send + 'a>> {
                Box::pin(async move {
                    if key.col() == 0 {
                        Err(FetchError::failed("bad tile"))
                    } else {
                        Ok(format!("tile:{}", key))
                    }
                })
            }
        }

        let queue = FetchQueue::new(Arc::new(MixedFetcher), FetchQueueConfig::default());
        let mut bad = queue.push(TileKey::new(2, 0, 0));
        let mut good = queue.push(TileKey::new(2, 0, 1));

        assert_eq!(bad.wait().await, Err(FetchError::failed("bad tile")));
        assert_eq!(good.wait().await.unwrap(), "tile:2/0/1");

        // The queue stays healthy after a failure.
        let mut more = queue.push(TileKey::new(2, 0, 2));
        more.wait().await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn test_failing_fetcher_reports_failed_state() {
        let queue = FetchQueue::new(Arc::new(FailingFetcher), FetchQueueConfig::default());
        let mut handle = queue.push(TileKey::new(0, 0, 0));
        let err = handle.wait().await.unwrap_err();
        assert!(!err.is_canceled());
        assert_eq!(handle.state(), FetchState::Failed);
    }

    #[tokio::test]
    async fn test_push_after_clear_settles_canceled() {
        let queue = FetchQueue::new(Arc::new(InstantFetcher), FetchQueueConfig::default());
        queue.clear();
        let mut handle = queue.push(TileKey::new(0, 0, 0));
        assert!(handle.is_terminal());
        assert_eq!(handle.wait().await, Err(FetchError::Canceled));
        assert!(!queue.has(&TileKey::new(0, 0, 0)));
    }

    #[test]
    #[should_panic(expected = "max_concurrent")]
    fn test_zero_ceiling_rejected() {
        let _ = FetchQueue::<String>::new(
            Arc::new(InstantFetcher),
            FetchQueueConfig::default().with_max_concurrent(0),
        );
    }
}
