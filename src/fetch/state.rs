//! Fetch entry lifecycle states.

use std::fmt;

/// Lifecycle of one fetch queue entry.
///
/// `Pending → InFlight → {Done | Canceled | Failed}`; a pending entry may
/// also settle `Canceled` without ever dispatching. No entry leaves a
/// terminal state; re-fetching a completed key takes a fresh push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Queued, waiting for a dispatch slot
    Pending,
    /// Dispatched to the fetcher, not yet settled
    InFlight,
    /// Fetcher delivered a payload
    Done,
    /// Canceled before a payload could be delivered
    Canceled,
    /// Fetcher rejected the request
    Failed,
}

impl FetchState {
    /// True once the entry can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchState::Done | FetchState::Canceled | FetchState::Failed
        )
    }

    /// True while the entry still occupies the queue.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchState::Pending => "pending",
            FetchState::InFlight => "inflight",
            FetchState::Done => "done",
            FetchState::Canceled => "canceled",
            FetchState::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}
