//! The tiled layer view: viewport updates in, displayed tiles out.
//!
//! `TiledLayerView` owns the whole pipeline and wires its parts
//! together:
//!
//! ```text
//!   update(viewport)
//!        │
//!        ▼
//!   TileInfoView ──► TileStrategy ──► acquire / release (TilePool)
//!                         │
//!                         ▼
//!                    FetchQueue ──► AvailabilityCheck ──► TileFetcher
//!                         │
//!                         ▼  (completions)
//!                  apply_completion ──► TileContainer.attach
//! ```
//!
//! The view is single-owner and synchronous at its surface: fetches run
//! as background tasks, and their outcomes queue up on a channel until
//! the owner calls [`poll_completions`](TiledLayerView::poll_completions)
//! or [`wait_until_idle`](TiledLayerView::wait_until_idle). Stale
//! outcomes (a fetch superseded by a refresh or a release) are matched
//! by entry identity and dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::availability::AvailabilityCheck;
use crate::fetch::{
    DispatchGate, FetchError, FetchHandle, FetchQueue, FetchQueueConfig, FetchResult,
    QueueStatsSnapshot, TileFetcher,
};
use crate::key::TileKey;
use crate::pool::{PoolStats, Tile, TilePool, TileSource};
use crate::strategy::{HostError, StrategyStats, TileHost, TileStrategy, TileStrategyConfig};
use crate::tiling::{InvalidLevelError, TileInfoView, TilingScheme};
use crate::viewport::{Extent, Point, SpatialReference, Viewport};

/// Display surface for a layer's tiles.
///
/// `attach` is called when a tile's content arrives, and again when a
/// refresh replaces it; implementations treat it as an upsert. `detach`
/// is called for every released tile, including ones whose content
/// never arrived.
pub trait TileContainer<T> {
    /// Show (or re-show) a tile whose source is set.
    fn attach(&mut self, tile: &Tile<T>);

    /// Remove a tile from display.
    fn detach(&mut self, tile: &Tile<T>);
}

/// Why a layer view could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    /// The layer does not define a tiling scheme.
    #[error("tiling information missing: the layer does not define a tiling scheme")]
    TilingInformationMissing,

    /// The layer's spatial reference does not match the view's.
    #[error("spatial reference incompatible: layer is {layer}, view is {view}")]
    SpatialReferenceIncompatible {
        /// Spatial reference of the layer's tiling scheme.
        layer: SpatialReference,
        /// Spatial reference of the hosting view.
        view: SpatialReference,
    },
}

/// Everything needed to attach a [`TiledLayerView`].
pub struct TiledLayerParams<T> {
    /// Tiling scheme of the layer; absent means the layer cannot be
    /// displayed as a tiled layer.
    pub scheme: Option<Arc<TilingScheme>>,
    /// Extent tiles are clamped to, when the layer declares one.
    pub full_extent: Option<Extent>,
    /// Spatial reference of the hosting view.
    pub view_spatial_reference: SpatialReference,
    /// Source of raw tile payloads.
    pub fetcher: Arc<dyn TileFetcher<T>>,
    /// Pre-fetch key substitution.
    pub availability: Arc<dyn AvailabilityCheck>,
    /// Fetch queue tuning.
    pub queue_config: FetchQueueConfig,
    /// Reconciliation tuning.
    pub strategy_config: TileStrategyConfig,
}

/// A settled fetch waiting to be applied by the view's owner.
struct Completion<T> {
    key: TileKey,
    id: u64,
    result: FetchResult<TileSource<T>>,
}

/// Wraps the raw payload fetcher with availability resolution and world
/// placement, so the queue's payload carries everything the renderer
/// needs even after an upsample substitution.
struct SourceFetcher<T> {
    inner: Arc<dyn TileFetcher<T>>,
    availability: Arc<dyn AvailabilityCheck>,
    scheme: Arc<TilingScheme>,
}

impl<T: Clone + Send + 'static> TileFetcher<TileSource<T>> for SourceFetcher<T> {
    fn fetch<'a>(
        &'a self,
        key: TileKey,
    ) -> Pin<Box<dyn Future<Output = FetchResult<TileSource<T>>> + Send + 'a>> {
        Box::pin(async move {
            let fetch_key = match self.availability.resolve(key).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    // Missing availability data is not a missing tile.
                    trace!(key = %key, error = %err, "availability unresolved, fetching directly");
                    key
                }
            };
            let data = self.inner.fetch(fetch_key).await?;
            let origin = self.scheme.tile_origin(&fetch_key)?;
            let resolution = self.scheme.tile_resolution(&fetch_key)?;
            Ok(TileSource {
                key: fetch_key,
                origin,
                resolution,
                data,
            })
        })
    }
}

/// Enqueue a fetch for `key` unless one is already live, and forward its
/// eventual outcome onto the completion channel.
fn spawn_fetch<T: Clone + Send + 'static>(
    queue: &FetchQueue<TileSource<T>>,
    requests: &mut HashMap<TileKey, FetchHandle<TileSource<T>>>,
    completion_tx: &mpsc::UnboundedSender<Completion<T>>,
    key: TileKey,
) {
    if queue.has(&key) {
        return;
    }
    let handle = queue.push(key);
    let id = handle.id();
    let mut watcher = handle.clone();
    let tx = completion_tx.clone();
    tokio::spawn(async move {
        let result = watcher.wait().await;
        let _ = tx.send(Completion { key, id, result });
    });
    requests.insert(key, handle);
    trace!(key = %key, "tile fetch enqueued");
}

/// The strategy's view of the layer during one reconciliation pass:
/// every field of [`TiledLayerView`] except the strategy itself.
struct LayerHost<'a, T: Clone + Send + 'static> {
    info_view: &'a TileInfoView,
    queue: &'a FetchQueue<TileSource<T>>,
    pool: &'a mut TilePool<T>,
    container: &'a mut dyn TileContainer<T>,
    requests: &'a mut HashMap<TileKey, FetchHandle<TileSource<T>>>,
    completion_tx: &'a mpsc::UnboundedSender<Completion<T>>,
}

impl<'a, T: Clone + Send + 'static> TileHost<T> for LayerHost<'a, T> {
    fn acquire_tile(&mut self, key: TileKey) -> Result<Tile<T>, HostError> {
        let resolution = self
            .info_view
            .tile_resolution(&key)
            .map_err(|err| HostError::new(key, err.to_string()))?;
        let scheme = self.info_view.scheme();
        let mut tile = self.pool.acquire();
        tile.key_mut().set_from(&key);
        tile.set_resolution(resolution);
        tile.set_size(scheme.tile_width(), scheme.tile_height());
        spawn_fetch(self.queue, self.requests, self.completion_tx, key);
        Ok(tile)
    }

    fn release_tile(&mut self, tile: Tile<T>) {
        if let Some(handle) = self.requests.remove(&tile.key()) {
            if !handle.is_terminal() {
                handle.cancel();
            }
        }
        self.container.detach(&tile);
        self.pool.release(tile);
    }
}

/// Tiled layer attached to a view: reconciles tiles against viewport
/// updates and fills them as fetches settle.
///
/// Runs inside a tokio runtime; fetches are spawned tasks. All mutation
/// happens through the single owner, so completion application never
/// races a reconciliation pass.
pub struct TiledLayerView<T: Clone + Send + 'static> {
    info_view: TileInfoView,
    queue: FetchQueue<TileSource<T>>,
    strategy: TileStrategy<T>,
    pool: TilePool<T>,
    container: Box<dyn TileContainer<T>>,
    // One entry per unfulfilled fetch; the layer is "updating" while any
    // remain.
    requests: HashMap<TileKey, FetchHandle<TileSource<T>>>,
    completion_tx: mpsc::UnboundedSender<Completion<T>>,
    completion_rx: mpsc::UnboundedReceiver<Completion<T>>,
    updating_tx: watch::Sender<bool>,
}

impl<T: Clone + Send + 'static> TiledLayerView<T> {
    /// Attach a layer view.
    ///
    /// Fails without touching the fetch stack when the layer lacks a
    /// tiling scheme or disagrees with the view's spatial reference.
    pub fn new(
        params: TiledLayerParams<T>,
        container: Box<dyn TileContainer<T>>,
    ) -> Result<Self, LayerError> {
        let scheme = params.scheme.ok_or(LayerError::TilingInformationMissing)?;
        let layer_sr = scheme.spatial_reference();
        if layer_sr != params.view_spatial_reference {
            return Err(LayerError::SpatialReferenceIncompatible {
                layer: layer_sr,
                view: params.view_spatial_reference,
            });
        }

        let source_fetcher: Arc<dyn TileFetcher<TileSource<T>>> = Arc::new(SourceFetcher {
            inner: params.fetcher,
            availability: params.availability,
            scheme: Arc::clone(&scheme),
        });
        let queue = FetchQueue::new(source_fetcher, params.queue_config);
        let gate: Arc<dyn DispatchGate> = Arc::new(queue.clone());
        let strategy = TileStrategy::new(gate, params.strategy_config);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (updating_tx, _) = watch::channel(false);

        debug!(
            levels = scheme.lods().len(),
            tile_width = scheme.tile_width(),
            tile_height = scheme.tile_height(),
            "tiled layer view attached"
        );

        Ok(Self {
            info_view: TileInfoView::new(scheme, params.full_extent),
            queue,
            strategy,
            pool: TilePool::new(),
            container,
            requests: HashMap::new(),
            completion_tx,
            completion_rx,
            updating_tx,
        })
    }

    /// Reconcile the layer against a new viewport.
    ///
    /// Selects the display level for the viewport's resolution, then
    /// acquires exactly the tiles that entered coverage and drops
    /// exactly the ones that left it. New tiles start fetching before
    /// this returns; their content lands via
    /// [`poll_completions`](Self::poll_completions).
    pub fn update(&mut self, viewport: &Viewport) {
        self.info_view.update_for_viewport(viewport);
        let mut host = LayerHost {
            info_view: &self.info_view,
            queue: &self.queue,
            pool: &mut self.pool,
            container: self.container.as_mut(),
            requests: &mut self.requests,
            completion_tx: &self.completion_tx,
        };
        self.strategy.update(viewport, &self.info_view, &mut host);
        self.refresh_updating_flag();
    }

    /// Re-fetch content for every tracked tile.
    ///
    /// Outstanding fetches are canceled first; their late results are
    /// discarded in favor of the new generation.
    pub fn refresh(&mut self) {
        self.queue.reset();
        self.requests.clear();
        for key in self.strategy.tile_keys() {
            spawn_fetch(&self.queue, &mut self.requests, &self.completion_tx, key);
        }
        self.refresh_updating_flag();
        debug!(tiles = self.requests.len(), "layer refresh requested");
    }

    /// Release every tile and shut the fetch queue down.
    ///
    /// Terminal: later pushes settle canceled immediately. Safe to call
    /// more than once.
    pub fn detach(&mut self) {
        let mut host = LayerHost {
            info_view: &self.info_view,
            queue: &self.queue,
            pool: &mut self.pool,
            container: self.container.as_mut(),
            requests: &mut self.requests,
            completion_tx: &self.completion_tx,
        };
        self.strategy.destroy(&mut host);
        self.queue.clear();
        self.requests.clear();
        self.refresh_updating_flag();
        debug!("tiled layer view detached");
    }

    /// Apply every completion that has already settled, without waiting.
    ///
    /// Returns the number of completions processed.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.apply_completion(completion);
            applied += 1;
        }
        self.refresh_updating_flag();
        applied
    }

    /// Apply completions as they settle until no fetch is outstanding.
    pub async fn wait_until_idle(&mut self) {
        while !self.requests.is_empty() {
            let Some(completion) = self.completion_rx.recv().await else {
                break;
            };
            self.apply_completion(completion);
            self.refresh_updating_flag();
        }
        self.refresh_updating_flag();
    }

    /// True while any tile fetch is unfulfilled.
    pub fn is_updating(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Watch channel mirroring [`is_updating`](Self::is_updating); flips
    /// only on actual transitions.
    pub fn updating_watch(&self) -> watch::Receiver<bool> {
        self.updating_tx.subscribe()
    }

    /// Currently selected display level.
    pub fn level(&self) -> u32 {
        self.info_view.level()
    }

    /// Resolution of the selected display level.
    pub fn resolution(&self) -> f64 {
        self.info_view.resolution()
    }

    /// World-space bounds of `key`'s tile.
    pub fn tile_bounds(&self, key: &TileKey) -> Result<Extent, InvalidLevelError> {
        self.info_view.tile_bounds(key)
    }

    /// World coordinates of `key`'s upper-left corner.
    pub fn tile_origin(&self, key: &TileKey) -> Result<Point, InvalidLevelError> {
        self.info_view.tile_origin(key)
    }

    /// Resolution of tiles at `key`'s level.
    pub fn tile_resolution(&self, key: &TileKey) -> Result<f64, InvalidLevelError> {
        self.info_view.tile_resolution(key)
    }

    /// True while `key` is tracked, displayed or retained.
    pub fn has_tile(&self, key: &TileKey) -> bool {
        self.strategy.contains(key)
    }

    /// Shared access to a tracked tile.
    pub fn tile(&self, key: &TileKey) -> Option<&Tile<T>> {
        self.strategy.tile(key)
    }

    /// Number of tiles in the current wanted set.
    pub fn held_count(&self) -> usize {
        self.strategy.held_count()
    }

    /// Number of tiles parked for revival.
    pub fn retained_count(&self) -> usize {
        self.strategy.retained_count()
    }

    /// Number of unfulfilled tile fetches.
    pub fn pending_fetch_count(&self) -> usize {
        self.requests.len()
    }

    /// Fetch queue counters.
    pub fn queue_stats(&self) -> QueueStatsSnapshot {
        self.queue.stats()
    }

    /// Reconciliation counters.
    pub fn strategy_stats(&self) -> StrategyStats {
        self.strategy.stats()
    }

    /// Tile pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn apply_completion(&mut self, completion: Completion<T>) {
        let Completion { key, id, result } = completion;
        let current = self.requests.get(&key).map(|handle| handle.id()) == Some(id);
        if !current {
            trace!(key = %key, "ignoring completion for a superseded fetch");
            return;
        }
        self.requests.remove(&key);

        match result {
            Ok(source) => {
                let held = self.strategy.is_held(&key);
                match self.strategy.tile_mut(&key) {
                    Some(tile) => {
                        tile.set_source(source);
                        if held {
                            self.container.attach(tile);
                        }
                        trace!(key = %key, "tile content applied");
                    }
                    None => {
                        trace!(key = %key, "content arrived for an untracked tile");
                    }
                }
            }
            Err(FetchError::Canceled) => {
                trace!(key = %key, "tile fetch canceled");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "tile fetch failed");
            }
        }
    }

    fn refresh_updating_flag(&self) {
        let updating = !self.requests.is_empty();
        let changed = self.updating_tx.send_if_modified(|state| {
            if *state != updating {
                *state = updating;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(updating, "layer updating state changed");
        }
    }
}
