use std::collections::{BTreeMap, HashMap};

use super::addressing::{TileKey, TileRect};
use super::tile::{CellColor, Tile, Version};

/// A local write not yet confirmed by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayEntry {
    /// Submission order across the whole pipeline.
    pub seq: u64,
    pub ch: char,
    pub color: Option<CellColor>,
}

/// In-memory tile cache plus the optimistic overlay for each tile.
///
/// Any operation that replaces a tile wholesale replays the overlay on top of
/// the new contents, so an authoritative refresh never erases a local edit that
/// is still in flight.
#[derive(Debug, Default)]
pub struct TileStore {
    tiles: HashMap<TileKey, Tile>,
    overlay: HashMap<TileKey, BTreeMap<usize, OverlayEntry>>,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.tiles.contains_key(&key)
    }

    pub fn get(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key)
    }

    pub fn get_mut(&mut self, key: TileKey) -> Option<&mut Tile> {
        self.tiles.get_mut(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.tiles.keys().copied()
    }

    /// Returns the tile for `key`, creating a blank version-0 tile if absent.
    pub fn ensure(&mut self, key: TileKey) -> &mut Tile {
        self.tiles.entry(key).or_insert_with(|| Tile::blank(key))
    }

    /// Replace the stored tile with a fresh snapshot, then replay pending
    /// overlay entries for it.
    pub fn upsert(&mut self, tile: Tile) {
        let key = tile.key;
        self.tiles.insert(key, tile);
        self.reapply_overlay(key);
    }

    pub fn version(&self, key: TileKey) -> Option<Version> {
        self.tiles.get(&key).map(|tile| tile.version)
    }

    pub fn set_version(&mut self, key: TileKey, version: Version) {
        if let Some(tile) = self.tiles.get_mut(&key) {
            tile.version = version;
        }
    }

    /// Apply a local edit: ensure the tile, write the cell, and remember the
    /// write until the server confirms or rejects it.
    pub fn apply_local(&mut self, key: TileKey, offset: usize, entry: OverlayEntry) -> bool {
        if !self.ensure(key).write_cell(offset, entry.ch, entry.color) {
            return false;
        }
        self.overlay.entry(key).or_default().insert(offset, entry);
        true
    }

    /// Drop the overlay entry at `offset` if it still belongs to edit `seq`.
    /// A newer edit to the same cell keeps its entry.
    pub fn clear_overlay(&mut self, key: TileKey, offset: usize, seq: u64) -> bool {
        let Some(cells) = self.overlay.get_mut(&key) else {
            return false;
        };
        let cleared = match cells.get(&offset) {
            Some(entry) if entry.seq == seq => {
                cells.remove(&offset);
                true
            }
            _ => false,
        };
        if cells.is_empty() {
            self.overlay.remove(&key);
        }
        cleared
    }

    /// Replay every pending entry for `key` in submission order. Returns how
    /// many cells were rewritten.
    pub fn reapply_overlay(&mut self, key: TileKey) -> usize {
        let Some(cells) = self.overlay.get(&key) else {
            return 0;
        };
        let Some(tile) = self.tiles.get_mut(&key) else {
            return 0;
        };
        let mut pending: Vec<(usize, OverlayEntry)> =
            cells.iter().map(|(offset, entry)| (*offset, *entry)).collect();
        pending.sort_by_key(|(_, entry)| entry.seq);
        for (offset, entry) in &pending {
            tile.write_cell(*offset, entry.ch, entry.color);
        }
        pending.len()
    }

    pub fn has_pending(&self, key: TileKey) -> bool {
        self.overlay.get(&key).is_some_and(|cells| !cells.is_empty())
    }

    pub fn pending(&self, key: TileKey) -> Vec<(usize, OverlayEntry)> {
        self.overlay
            .get(&key)
            .map(|cells| cells.iter().map(|(offset, entry)| (*offset, *entry)).collect())
            .unwrap_or_default()
    }

    pub fn pending_total(&self) -> usize {
        self.overlay.values().map(BTreeMap::len).sum()
    }

    /// Shrink the cache to `capacity` tiles by evicting the tiles farthest
    /// from `keep`. Tiles inside `keep` and tiles with pending overlay entries
    /// are never evicted, so the result may stay above `capacity`.
    pub fn evict_beyond(&mut self, keep: TileRect, capacity: usize) -> Vec<TileKey> {
        if self.tiles.len() <= capacity {
            return Vec::new();
        }
        let mut candidates: Vec<(u64, TileKey)> = self
            .tiles
            .keys()
            .copied()
            .filter(|key| !keep.contains(*key) && !self.has_pending(*key))
            .map(|key| (keep.distance_to(key), key))
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));
        let excess = self.tiles.len() - capacity;
        let evicted: Vec<TileKey> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, key)| key)
            .collect();
        for key in &evicted {
            self.tiles.remove(key);
        }
        evicted
    }
}
