//! Optimistic edits and per-tile ordered patch dispatch.
//!
//! Every tile key gets its own worker task fed by a bounded channel, so patches
//! to one tile reach the server strictly in submission order while different
//! tiles progress independently. The version token is read from the store at
//! dispatch time: it is whatever the previous patch (or resync) left behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::cache::{
    CellColor, OverlayEntry, SharedStore, TILE_CELLS, Tile, TileKey, TileRect, Version,
};
use crate::config::EngineConfig;
use crate::gateway::{PatchRequest, TileGateway, TileRecord};
use crate::telemetry::PerfGuard;

/// Identifies one submitted edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditReceipt {
    pub key: TileKey,
    pub offset: usize,
    pub seq: u64,
}

/// Corrective fetches per rejected patch when the snapshot trails a push.
const RESYNC_ATTEMPTS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    Confirmed(Version),
    /// The patch failed and the tile was replaced by the server's copy.
    Resynced(Version),
    /// The patch failed and so did the corrective fetch.
    Stale,
}

#[derive(Debug)]
struct PatchJob {
    key: TileKey,
    offset: usize,
    ch: char,
    color: Option<CellColor>,
    seq: u64,
}

struct WorkerSlot {
    id: u64,
    sender: mpsc::Sender<PatchJob>,
    /// Jobs handed to this worker and not yet finished. A worker only retires
    /// when this is zero, so no job can be stranded in a closing channel.
    pending: usize,
}

struct PipelineInner {
    store: SharedStore,
    gateway: Arc<dyn TileGateway>,
    workers: Mutex<HashMap<TileKey, WorkerSlot>>,
    next_seq: AtomicU64,
    next_worker: AtomicU64,
    outstanding: watch::Sender<usize>,
    queue_capacity: usize,
    worker_idle: Duration,
}

#[derive(Clone)]
pub struct EditPipeline {
    inner: Arc<PipelineInner>,
}

impl EditPipeline {
    pub fn new(store: SharedStore, gateway: Arc<dyn TileGateway>, config: &EngineConfig) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(PipelineInner {
                store,
                gateway,
                workers: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(1),
                next_worker: AtomicU64::new(1),
                outstanding,
                queue_capacity: config.patch_queue_capacity.max(1),
                worker_idle: config.patch_worker_idle(),
            }),
        }
    }

    /// Write `ch` into the local tile immediately and queue the matching
    /// patch. Returns `None` when `offset` is outside the tile.
    pub async fn submit_edit(
        &self,
        key: TileKey,
        offset: usize,
        ch: char,
        color: Option<CellColor>,
    ) -> Option<EditReceipt> {
        if offset >= TILE_CELLS {
            warn!(target = "scrawl::edit", tile = %key, offset, "edit offset out of range");
            return None;
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner
            .store
            .lock()
            .apply_local(key, offset, OverlayEntry { seq, ch, color });
        self.inner.outstanding.send_modify(|count| *count += 1);
        trace!(target = "scrawl::edit", tile = %key, offset, seq, "optimistic edit applied");

        self.inner
            .enqueue(PatchJob {
                key,
                offset,
                ch,
                color,
                seq,
            })
            .await;
        Some(EditReceipt { key, offset, seq })
    }

    /// Number of patches queued or in flight across all tiles.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Resolves once no patch is queued or in flight.
    pub async fn idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    pub fn active_workers(&self) -> usize {
        self.inner.workers.lock().len()
    }
}

impl PipelineInner {
    async fn enqueue(self: &Arc<Self>, job: PatchJob) {
        let sender = {
            let mut workers = self.workers.lock();
            let slot = workers
                .entry(job.key)
                .or_insert_with(|| self.spawn_worker(job.key));
            slot.pending += 1;
            slot.sender.clone()
        };
        if let Err(mpsc::error::SendError(job)) = sender.send(job).await {
            error!(
                target = "scrawl::edit",
                tile = %job.key,
                seq = job.seq,
                "patch worker vanished; edit stays local"
            );
            self.finish(job.key);
        }
    }

    fn spawn_worker(self: &Arc<Self>, key: TileKey) -> WorkerSlot {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(Arc::clone(self).run_worker(key, id, rx));
        debug!(target = "scrawl::edit", tile = %key, worker = id, "patch worker started");
        WorkerSlot {
            id,
            sender,
            pending: 0,
        }
    }

    async fn run_worker(self: Arc<Self>, key: TileKey, id: u64, mut rx: mpsc::Receiver<PatchJob>) {
        loop {
            match tokio::time::timeout(self.worker_idle, rx.recv()).await {
                Ok(Some(job)) => {
                    let outcome = self.process(job).await;
                    trace!(target = "scrawl::edit", tile = %key, ?outcome, "patch settled");
                    self.finish(key);
                }
                Ok(None) => break,
                Err(_) => {
                    let mut workers = self.workers.lock();
                    let idle = workers
                        .get(&key)
                        .is_some_and(|slot| slot.id == id && slot.pending == 0);
                    if idle {
                        workers.remove(&key);
                        break;
                    }
                }
            }
        }
        debug!(target = "scrawl::edit", tile = %key, worker = id, "patch worker retired");
    }

    fn finish(&self, key: TileKey) {
        if let Some(slot) = self.workers.lock().get_mut(&key) {
            slot.pending = slot.pending.saturating_sub(1);
        }
        self.outstanding
            .send_modify(|count| *count = count.saturating_sub(1));
    }

    async fn process(&self, job: PatchJob) -> PatchOutcome {
        let _perf = PerfGuard::new("edit.patch");
        let known_version = self.store.lock().version(job.key).unwrap_or(0);
        let patch = PatchRequest {
            x: job.key.x,
            y: job.key.y,
            offset: job.offset,
            text: job.ch.to_string(),
            known_version,
            color_hex: job.color.map(CellColor::to_hex),
        };
        match self.gateway.patch_tile(patch).await {
            Ok(ack) => {
                let mut store = self.store.lock();
                // A push event for a later version may already have landed.
                let version = store.version(job.key).unwrap_or(0).max(ack.version);
                store.set_version(job.key, version);
                store.clear_overlay(job.key, job.offset, job.seq);
                PatchOutcome::Confirmed(version)
            }
            Err(err) => {
                if err.is_conflict() {
                    debug!(
                        target = "scrawl::edit",
                        tile = %job.key,
                        known_version,
                        "patch rejected as stale; resyncing"
                    );
                } else {
                    warn!(
                        target = "scrawl::edit",
                        tile = %job.key,
                        error = %err,
                        "patch failed; resyncing"
                    );
                }
                self.store
                    .lock()
                    .clear_overlay(job.key, job.offset, job.seq);
                self.resync(job.key).await
            }
        }
    }

    /// Replace `key` with the server's copy and replay still-pending edits.
    ///
    /// A push can land while the fetch is in flight. A snapshot older than
    /// the resident tile is refetched once; if it is still behind, the
    /// resident tile is kept so its version never moves backwards.
    async fn resync(&self, key: TileKey) -> PatchOutcome {
        for attempt in 1..=RESYNC_ATTEMPTS {
            let records = match self.gateway.fetch_tiles(TileRect::single(key)).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(
                        target = "scrawl::edit",
                        tile = %key,
                        error = %err,
                        "resync failed; keeping local state"
                    );
                    return PatchOutcome::Stale;
                }
            };
            let tile = records
                .into_iter()
                .find(|record| record.key() == key)
                .map(TileRecord::into_tile)
                .unwrap_or_else(|| Tile::blank(key));

            let mut store = self.store.lock();
            let resident = store.version(key).unwrap_or(0);
            if tile.version < resident {
                if attempt < RESYNC_ATTEMPTS {
                    trace!(
                        target = "scrawl::edit",
                        tile = %key,
                        fetched = tile.version,
                        resident,
                        "resync snapshot behind a push; refetching"
                    );
                    continue;
                }
                let replayed = store.reapply_overlay(key);
                debug!(
                    target = "scrawl::edit",
                    tile = %key,
                    fetched = tile.version,
                    resident,
                    replayed,
                    "resync snapshot older than resident tile; kept resident"
                );
                return PatchOutcome::Resynced(resident);
            }

            let version = tile.version;
            store.upsert(tile);
            debug!(
                target = "scrawl::edit",
                tile = %key,
                version,
                replayed = store.pending(key).len(),
                "tile resynced"
            );
            return PatchOutcome::Resynced(version);
        }
        PatchOutcome::Stale
    }
}
