//! Viewport refresh: fetch the visible rect, make every tile in it resident,
//! evict what drifted far away and reconcile hub memberships.
//!
//! Refreshes are generation-checked. Starting a new one aborts the fetch of
//! the previous one, and a result that arrives after a newer refresh began is
//! dropped without touching the store or the memberships.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace, warn};

use super::{CanvasSize, CellMetrics, visible_tile_rect};
use crate::cache::{SharedStore, TileKey, TileRect};
use crate::camera::Camera;
use crate::config::EngineConfig;
use crate::gateway::TileGateway;
use crate::realtime::TileChannel;
use crate::telemetry::{PerfGuard, record_gauge};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied {
        rect: TileRect,
        fetched: usize,
        joined: usize,
        left: usize,
        evicted: usize,
    },
    /// A newer refresh started before this one finished.
    Superseded,
    /// The fetch failed; store and memberships are untouched.
    Failed,
}

impl RefreshOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RefreshOutcome::Applied { .. })
    }
}

#[derive(Clone, Copy, Debug)]
struct Geometry {
    camera: Camera,
    canvas: CanvasSize,
}

struct ControllerInner {
    store: SharedStore,
    gateway: Arc<dyn TileGateway>,
    channel: Arc<TileChannel>,
    cell: CellMetrics,
    margin: i64,
    debounce: Duration,
    capacity: usize,
    geometry: Mutex<Geometry>,
    joined: Mutex<HashSet<TileKey>>,
    last_rect: Mutex<Option<TileRect>>,
    generation: AtomicU64,
    in_flight: Mutex<Option<(u64, AbortHandle)>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ViewportController {
    inner: Arc<ControllerInner>,
}

impl ViewportController {
    pub fn new(
        store: SharedStore,
        gateway: Arc<dyn TileGateway>,
        channel: Arc<TileChannel>,
        config: &EngineConfig,
        camera: Camera,
        canvas: CanvasSize,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                gateway,
                channel,
                cell: CellMetrics::from_config(config),
                margin: config.tile_margin,
                debounce: config.refresh_debounce(),
                capacity: config.cache_capacity,
                geometry: Mutex::new(Geometry { camera, canvas }),
                joined: Mutex::new(HashSet::new()),
                last_rect: Mutex::new(None),
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn cell_metrics(&self) -> CellMetrics {
        self.inner.cell
    }

    pub fn camera(&self) -> Camera {
        self.inner.geometry.lock().camera
    }

    pub fn set_camera(&self, camera: Camera) {
        self.inner.geometry.lock().camera = camera;
    }

    pub fn canvas(&self) -> CanvasSize {
        self.inner.geometry.lock().canvas
    }

    pub fn set_canvas(&self, canvas: CanvasSize) {
        self.inner.geometry.lock().canvas = canvas;
    }

    pub fn visible_rect(&self) -> TileRect {
        self.inner.visible_rect()
    }

    /// Tiles this view currently holds a hub membership for, sorted.
    pub fn joined_tiles(&self) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self.inner.joined.lock().iter().copied().collect();
        keys.sort_by_key(|key| (key.y, key.x));
        keys
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    pub async fn refresh_viewport(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// React to camera motion. Returns true when a refresh is scheduled
    /// (newly or already). At most one refresh is pending at a time and it
    /// reads the rect when it fires, not when it was scheduled.
    pub fn on_camera_moved(&self) -> bool {
        let rect = self.visible_rect();
        {
            let mut last = self.inner.last_rect.lock();
            if *last == Some(rect) {
                return self.has_pending_refresh();
            }
            *last = Some(rect);
        }

        let mut pending = self.inner.pending.lock();
        if pending.is_some() {
            return true;
        }
        let inner = Arc::clone(&self.inner);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            // Leave the slot first so motion during the fetch can schedule
            // a follow-up.
            inner.pending.lock().take();
            inner.refresh().await;
        }));
        trace!(target = "scrawl::viewport", rect = %rect, "refresh scheduled");
        true
    }

    /// The hub dropped every membership; forget ours and rebuild them.
    pub async fn on_reconnected(&self) -> RefreshOutcome {
        let forgotten = {
            let mut joined = self.inner.joined.lock();
            let count = joined.len();
            joined.clear();
            count
        };
        debug!(target = "scrawl::viewport", forgotten, "reconnected; rejoining visible tiles");
        self.inner.refresh().await
    }

    /// Cancel pending work and leave every joined tile.
    pub fn shutdown(&self) {
        if let Some(pending) = self.inner.pending.lock().take() {
            pending.abort();
        }
        if let Some((_, fetch)) = self.inner.in_flight.lock().take() {
            fetch.abort();
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let joined: Vec<TileKey> = self.inner.joined.lock().drain().collect();
        for key in joined {
            if let Err(err) = self.inner.channel.leave(key) {
                debug!(target = "scrawl::viewport", tile = %key, error = %err, "leave on shutdown failed");
            }
        }
    }
}

impl ControllerInner {
    fn visible_rect(&self) -> TileRect {
        let geometry = *self.geometry.lock();
        visible_tile_rect(&geometry.camera, geometry.canvas, self.cell, self.margin)
    }

    async fn refresh(&self) -> RefreshOutcome {
        let _perf = PerfGuard::new("viewport.refresh");
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
        let rect = self.visible_rect();
        *self.last_rect.lock() = Some(rect);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let gateway = Arc::clone(&self.gateway);
        let fetch = tokio::spawn(async move { gateway.fetch_tiles(rect).await });
        if let Some((_, previous)) = self
            .in_flight
            .lock()
            .replace((generation, fetch.abort_handle()))
        {
            previous.abort();
        }
        let result = fetch.await;

        if self.generation.load(Ordering::SeqCst) != generation {
            trace!(target = "scrawl::viewport", generation, "refresh superseded");
            return RefreshOutcome::Superseded;
        }
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.as_ref().is_some_and(|(owner, _)| *owner == generation) {
                in_flight.take();
            }
        }

        let records = match result {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                warn!(
                    target = "scrawl::viewport",
                    rect = %rect,
                    error = %err,
                    "viewport fetch failed"
                );
                return RefreshOutcome::Failed;
            }
            Err(err) if err.is_cancelled() => return RefreshOutcome::Superseded,
            Err(err) => {
                warn!(target = "scrawl::viewport", error = %err, "viewport fetch task failed");
                return RefreshOutcome::Failed;
            }
        };

        let (fetched, evicted) = {
            let mut store = self.store.lock();
            let mut fetched = 0;
            for record in records {
                let key = record.key();
                if !rect.contains(key) {
                    continue;
                }
                // A pushed patch may have already moved the tile past this
                // snapshot.
                if store.version(key).is_some_and(|current| current > record.version) {
                    trace!(target = "scrawl::viewport", tile = %key, "skipping older snapshot");
                    continue;
                }
                store.upsert(record.into_tile());
                fetched += 1;
            }
            for key in rect.keys() {
                store.ensure(key);
            }
            let evicted = store.evict_beyond(rect, self.capacity);
            record_gauge("viewport.resident", store.len() as u64);
            (fetched, evicted.len())
        };

        let (joined, left) = self.sync_memberships(rect);
        debug!(
            target = "scrawl::viewport",
            rect = %rect,
            fetched,
            joined,
            left,
            evicted,
            "viewport refreshed"
        );
        RefreshOutcome::Applied {
            rect,
            fetched,
            joined,
            left,
            evicted,
        }
    }

    fn sync_memberships(&self, rect: TileRect) -> (usize, usize) {
        let mut joined = self.joined.lock();
        let gone: Vec<TileKey> = joined
            .iter()
            .copied()
            .filter(|key| !rect.contains(*key))
            .collect();
        for key in &gone {
            if let Err(err) = self.channel.leave(*key) {
                debug!(target = "scrawl::viewport", tile = %key, error = %err, "leave failed");
            }
            joined.remove(key);
        }

        let mut added = 0;
        for key in rect.keys() {
            if joined.contains(&key) {
                continue;
            }
            match self.channel.join(key) {
                Ok(()) => {
                    joined.insert(key);
                    added += 1;
                }
                Err(err) => {
                    // Retried on the next refresh.
                    debug!(target = "scrawl::viewport", tile = %key, error = %err, "join failed");
                }
            }
        }
        (added, gone.len())
    }
}
