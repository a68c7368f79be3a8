//! Tile cache: addressing, the fixed-size tile model and the store that owns
//! every resident tile plus its optimistic overlay.
//!
//! The store is pure data. Callers share it as [`SharedStore`] and must never
//! hold the lock across an `.await`, which keeps each component's mutation
//! atomic with respect to the others.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod addressing;
pub mod store;
pub mod tile;

pub use addressing::{CellPos, TILE_CELLS, TILE_COLS, TILE_ROWS, TileAddress, TileKey, TileRect};
pub use store::{OverlayEntry, TileStore};
pub use tile::{CellColor, Tile, Version};

pub type SharedStore = Arc<Mutex<TileStore>>;

pub fn shared_store() -> SharedStore {
    Arc::new(Mutex::new(TileStore::new()))
}
