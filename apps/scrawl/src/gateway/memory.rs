use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tile_hub::{EVENT_TILE_PATCHED, LocalHub};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{
    GatewayError, GatewayResult, PatchAck, PatchRequest, TileGateway, TilePatched, TileRecord,
};
use crate::cache::tile::parse_color_run;
use crate::cache::{TILE_CELLS, Tile, TileKey, TileRect, Version};

/// Injected failure for the next patch call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchFault {
    Conflict,
    Unavailable,
}

#[derive(Debug, Default)]
struct BackendState {
    tiles: HashMap<TileKey, Tile>,
    patch_log: Vec<PatchRequest>,
    fetches: usize,
    patch_faults: VecDeque<PatchFault>,
    failing_fetches: usize,
    fetch_delay: Option<Duration>,
}

/// Authoritative in-process tile service with optimistic concurrency.
///
/// Accepted patches bump the tile version and are broadcast as `tilePatched`
/// to the tile's hub group when a [`LocalHub`] is attached.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    hub: Option<LocalHub>,
    gate: watch::Sender<bool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryBackend {
    pub fn new(hub: Option<LocalHub>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(BackendState::default()),
            hub,
            gate,
        }
    }

    pub fn seed(&self, tile: Tile) {
        self.state.lock().tiles.insert(tile.key, tile);
    }

    pub fn tile(&self, key: TileKey) -> Option<Tile> {
        self.state.lock().tiles.get(&key).cloned()
    }

    /// Every patch that reached the backend, accepted or not, in arrival order.
    pub fn patch_log(&self) -> Vec<PatchRequest> {
        self.state.lock().patch_log.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    pub fn fail_next_patch(&self, fault: PatchFault) {
        self.state.lock().patch_faults.push_back(fault);
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().failing_fetches = count;
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state.lock().fetch_delay = delay;
    }

    /// Park incoming patches until [`release_patches`](Self::release_patches).
    pub fn hold_patches(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_patches(&self) {
        self.gate.send_replace(true);
    }

    /// Write as another client would, bypassing version checks. Returns the
    /// new version.
    pub fn remote_write(&self, key: TileKey, offset: usize, text: &str, color: Option<&str>) -> Version {
        let (event, version) = {
            let mut state = self.state.lock();
            let tile = state.tiles.entry(key).or_insert_with(|| Tile::blank(key));
            apply_text(tile, offset, text, color);
            tile.version += 1;
            let version = tile.version;
            (
                TilePatched {
                    x: key.x,
                    y: key.y,
                    offset,
                    text: text.to_string(),
                    color: color.map(str::to_string),
                    version,
                },
                version,
            )
        };
        self.broadcast(key, &event);
        version
    }

    fn broadcast(&self, key: TileKey, event: &TilePatched) {
        let Some(hub) = &self.hub else {
            return;
        };
        match serde_json::to_vec(event) {
            Ok(payload) => {
                hub.publish(&key.to_string(), EVENT_TILE_PATCHED, Bytes::from(payload), None);
            }
            Err(err) => warn!(target = "scrawl::backend", error = %err, "failed to encode tilePatched"),
        }
    }
}

fn apply_text(tile: &mut Tile, offset: usize, text: &str, color: Option<&str>) {
    let colors = color.and_then(parse_color_run);
    tile.splice(offset, text, colors.as_deref());
}

#[async_trait]
impl TileGateway for MemoryBackend {
    async fn fetch_tiles(&self, rect: TileRect) -> GatewayResult<Vec<TileRecord>> {
        let delay = self.state.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.fetches += 1;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(GatewayError::Unavailable("injected fetch failure".into()));
        }
        Ok(state
            .tiles
            .values()
            .filter(|tile| rect.contains(tile.key))
            .map(TileRecord::from)
            .collect())
    }

    async fn patch_tile(&self, patch: PatchRequest) -> GatewayResult<PatchAck> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let key = patch.key();
        let event = {
            let mut state = self.state.lock();
            state.patch_log.push(patch.clone());
            match state.patch_faults.pop_front() {
                Some(PatchFault::Conflict) => {
                    return Err(GatewayError::Conflict {
                        key,
                        known: patch.known_version,
                    });
                }
                Some(PatchFault::Unavailable) => {
                    return Err(GatewayError::Unavailable("injected patch failure".into()));
                }
                None => {}
            }
            if patch.offset >= TILE_CELLS {
                return Err(GatewayError::UnexpectedStatus {
                    status: 400,
                    body: format!("offset {} out of range", patch.offset),
                });
            }
            let tile = state.tiles.entry(key).or_insert_with(|| Tile::blank(key));
            if tile.version != patch.known_version {
                debug!(
                    target = "scrawl::backend",
                    tile = %key,
                    known = patch.known_version,
                    current = tile.version,
                    "rejecting stale patch"
                );
                return Err(GatewayError::Conflict {
                    key,
                    known: patch.known_version,
                });
            }
            apply_text(tile, patch.offset, &patch.text, patch.color_hex.as_deref());
            tile.version += 1;
            TilePatched {
                x: patch.x,
                y: patch.y,
                offset: patch.offset,
                text: patch.text.clone(),
                color: patch.color_hex.clone(),
                version: tile.version,
            }
        };
        let version = event.version;
        self.broadcast(key, &event);
        Ok(PatchAck { version })
    }
}
