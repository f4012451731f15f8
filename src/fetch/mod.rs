//! Tile fetch scheduling: queue, handles, and the fetcher seam.
//!
//! This module owns everything between "the strategy wants tile X" and
//! "a payload (or error) for X exists":
//!
//! - [`TileFetcher`]: the injected async source of tile payloads
//! - [`FetchQueue`]: ordered, deduplicated scheduler with a concurrency
//!   ceiling and a pause gate
//! - [`FetchHandle`]: clonable observer for one queued fetch
//! - [`FetchState`] / [`FetchError`]: lifecycle and failure taxonomy
//!
//! The queue never interprets payloads; it moves opaque `P` values from
//! the fetcher to whoever holds a handle.

mod error;
mod fetcher;
mod handle;
mod queue;
mod state;

pub use error::{FetchError, FetchResult};
pub use fetcher::TileFetcher;
pub use handle::FetchHandle;
pub use queue::{
    DispatchGate, FetchQueue, FetchQueueConfig, QueueStats, QueueStatsSnapshot,
    DEFAULT_MAX_CONCURRENT_FETCHES,
};
pub use state::FetchState;
