//! Observer handle for one fetch entry.
//!
//! A `FetchHandle` is what `push` hands back: a cheap, clonable view of one
//! queue entry. All handles for the same live entry share the same state
//! channel and result slot, so pushing an already-queued key observably
//! returns "the same future". Dropping a handle never cancels the fetch;
//! cancellation is an explicit call.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::fetch::error::{FetchError, FetchResult};
use crate::fetch::queue::QueueShared;
use crate::fetch::state::FetchState;
use crate::key::TileKey;

/// Handle to one entry of a [`FetchQueue`](crate::fetch::FetchQueue).
///
/// Observe progress with [`state`](Self::state)/[`wait`](Self::wait),
/// fetch the settled outcome with [`result`](Self::result), request
/// cancellation with [`cancel`](Self::cancel).
pub struct FetchHandle<P> {
    key: TileKey,
    id: u64,
    state_rx: watch::Receiver<FetchState>,
    result: Arc<Mutex<Option<FetchResult<P>>>>,
    shared: Arc<QueueShared<P>>,
}

impl<P> Clone for FetchHandle<P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            id: self.id,
            state_rx: self.state_rx.clone(),
            result: Arc::clone(&self.result),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for FetchHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl<P> FetchHandle<P> {
    pub(crate) fn new(
        key: TileKey,
        id: u64,
        state_rx: watch::Receiver<FetchState>,
        result: Arc<Mutex<Option<FetchResult<P>>>>,
        shared: Arc<QueueShared<P>>,
    ) -> Self {
        Self {
            key,
            id,
            state_rx,
            result,
            shared,
        }
    }

    /// Handle that settled `Canceled` before it ever had an entry, for
    /// pushes against a cleared queue.
    pub(crate) fn settled_canceled(key: TileKey, shared: Arc<QueueShared<P>>) -> Self {
        let (_, state_rx) = watch::channel(FetchState::Canceled);
        Self {
            key,
            id: 0,
            state_rx,
            result: Arc::new(Mutex::new(Some(Err(FetchError::Canceled)))),
            shared,
        }
    }

    /// The key this entry fetches.
    pub fn key(&self) -> TileKey {
        self.key
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FetchState {
        *self.state_rx.borrow()
    }

    /// True once the entry settled.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request cancellation.
    ///
    /// The entry settles `Canceled` immediately, freeing its key for a
    /// fresh push. A pending entry never dispatches; an in-flight
    /// entry's running fetch is signaled to stop and its late result is
    /// discarded. No-op after settling.
    pub fn cancel(&self) {
        self.shared.cancel_entry(self.key, self.id);
    }
}

impl<P: Clone> FetchHandle<P> {
    /// The settled outcome, or `None` while the entry is still active.
    pub fn result(&self) -> Option<FetchResult<P>> {
        self.result.lock().unwrap().clone()
    }

    /// Wait until the entry settles and return its outcome.
    ///
    /// Resolves immediately when already terminal. Cancel-safe: dropping
    /// the returned future leaves the entry untouched.
    pub async fn wait(&mut self) -> FetchResult<P> {
        loop {
            if self.state_rx.borrow_and_update().is_terminal() {
                break;
            }
            if self.state_rx.changed().await.is_err() {
                break;
            }
        }
        match self.result.lock().unwrap().clone() {
            Some(outcome) => outcome,
            // Entry vanished without settling (queue dropped mid-flight).
            None => Err(FetchError::Canceled),
        }
    }
}
