//! Tile and cell addressing on the infinite grid.
//!
//! Absolute cell coordinates map to a tile key plus a row-major offset inside
//! the tile using floor division and Euclidean remainder, so negative
//! coordinates land in the tile to their left/top rather than folding onto
//! tile zero.
//!
//! ```
//! # use scrawl_client_core::cache::addressing::{CellPos, TileKey};
//! let addr = CellPos::new(-1, 17).to_address();
//! assert_eq!(addr.tile, TileKey::new(-1, 1));
//! assert_eq!(addr.offset, 15 + 16);
//! assert_eq!(CellPos::from_address(addr), Some(CellPos::new(-1, 17)));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cells per tile row.
pub const TILE_COLS: i64 = 16;
/// Rows per tile.
pub const TILE_ROWS: i64 = 16;
pub const TILE_CELLS: usize = (TILE_COLS * TILE_ROWS) as usize;

/// Canonical identity of a tile. Rendered as `"x:y"` wherever a string key is
/// needed (hub group names, logs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i64,
    pub y: i64,
}

impl TileKey {
    pub const ORIGIN: TileKey = TileKey { x: 0, y: 0 };

    #[inline]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tile key {0:?}")]
pub struct ParseTileKeyError(pub String);

impl FromStr for TileKey {
    type Err = ParseTileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(':')
            .ok_or_else(|| ParseTileKeyError(s.to_string()))?;
        let x = x.parse().map_err(|_| ParseTileKeyError(s.to_string()))?;
        let y = y.parse().map_err(|_| ParseTileKeyError(s.to_string()))?;
        Ok(TileKey { x, y })
    }
}

/// Absolute character coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellPos {
    pub x: i64,
    pub y: i64,
}

/// A cell expressed as tile + local row-major offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileAddress {
    pub tile: TileKey,
    pub offset: usize,
}

impl CellPos {
    #[inline]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn to_address(self) -> TileAddress {
        let tile = TileKey::new(self.x.div_euclid(TILE_COLS), self.y.div_euclid(TILE_ROWS));
        let col = self.x.rem_euclid(TILE_COLS);
        let row = self.y.rem_euclid(TILE_ROWS);
        TileAddress {
            tile,
            offset: local_to_offset(col, row),
        }
    }

    /// Inverse of [`CellPos::to_address`]. `None` when the tile lies so far
    /// out that its cells are not representable.
    pub fn from_address(addr: TileAddress) -> Option<Self> {
        let (col, row) = offset_to_local(addr.offset);
        let x = addr.tile.x.checked_mul(TILE_COLS)?.checked_add(col)?;
        let y = addr.tile.y.checked_mul(TILE_ROWS)?.checked_add(row)?;
        Some(CellPos::new(x, y))
    }

    #[inline]
    pub fn offset_by(self, dx: i64, dy: i64) -> Self {
        CellPos::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

#[inline]
pub fn local_to_offset(col: i64, row: i64) -> usize {
    debug_assert!((0..TILE_COLS).contains(&col) && (0..TILE_ROWS).contains(&row));
    (row * TILE_COLS + col) as usize
}

/// Returns `(col, row)` within the tile.
#[inline]
pub fn offset_to_local(offset: usize) -> (i64, i64) {
    let offset = offset as i64;
    (offset % TILE_COLS, offset / TILE_COLS)
}

/// Inclusive rectangle of tile coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl TileRect {
    pub const fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn single(key: TileKey) -> Self {
        Self::new(key.x, key.y, key.x, key.y)
    }

    pub fn contains(&self, key: TileKey) -> bool {
        (self.min_x..=self.max_x).contains(&key.x) && (self.min_y..=self.max_y).contains(&key.y)
    }

    pub fn width(&self) -> u64 {
        self.max_x.abs_diff(self.min_x) + 1
    }

    pub fn height(&self) -> u64 {
        self.max_y.abs_diff(self.min_y) + 1
    }

    pub fn len(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Chebyshev distance in tiles from the rectangle; zero inside it.
    pub fn distance_to(&self, key: TileKey) -> u64 {
        let dx = if key.x < self.min_x {
            self.min_x.abs_diff(key.x)
        } else if key.x > self.max_x {
            key.x.abs_diff(self.max_x)
        } else {
            0
        };
        let dy = if key.y < self.min_y {
            self.min_y.abs_diff(key.y)
        } else if key.y > self.max_y {
            key.y.abs_diff(self.max_y)
        } else {
            0
        };
        dx.max(dy)
    }

    /// Row-major iteration over every key in the rectangle.
    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y)
            .flat_map(move |y| (min_x..=max_x).map(move |x| TileKey::new(x, y)))
    }
}

impl fmt::Display for TileRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..={}]x[{}..={}]",
            self.min_x, self.max_x, self.min_y, self.max_y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn round_trips_cells_across_sign_boundaries() {
        let samples = [-4097, -257, -33, -17, -16, -15, -1, 0, 1, 15, 16, 17, 255, 256, 4096];
        for &x in &samples {
            for &y in &samples {
                let cell = CellPos::new(x, y);
                let addr = cell.to_address();
                assert!(addr.offset < TILE_CELLS);
                assert_eq!(CellPos::from_address(addr), Some(cell), "cell {cell:?}");
            }
        }
    }

    #[test]
    fn unrepresentable_tiles_have_no_cells() {
        let addr = TileAddress {
            tile: TileKey::new(i64::MAX, 0),
            offset: 0,
        };
        assert_eq!(CellPos::from_address(addr), None);
        let addr = TileAddress {
            tile: TileKey::new(0, i64::MIN / TILE_ROWS - 1),
            offset: 0,
        };
        assert_eq!(CellPos::from_address(addr), None);
    }

    #[test]
    fn negative_cells_use_floor_division() {
        let addr = CellPos::new(-1, -1).to_address();
        assert_eq!(addr.tile, TileKey::new(-1, -1));
        assert_eq!(addr.offset, TILE_CELLS - 1);

        let addr = CellPos::new(-16, 0).to_address();
        assert_eq!(addr.tile, TileKey::new(-1, 0));
        assert_eq!(addr.offset, 0);
    }

    #[test]
    fn extreme_coordinates_are_addressable() {
        for cell in [
            CellPos::new(i64::MIN, i64::MAX),
            CellPos::new(i64::MAX, i64::MIN),
            CellPos::new(0, 0),
            CellPos::new(-1_000_000_000, 1_000_000_000),
        ] {
            let addr = cell.to_address();
            assert_eq!(CellPos::from_address(addr), Some(cell));
        }
        let far = CellPos::new(i64::MAX, i64::MAX).to_address().tile;
        let near = CellPos::new(i64::MIN, i64::MIN).to_address().tile;
        assert_ne!(far, near);
        assert_ne!(far, TileKey::ORIGIN);
    }

    #[test]
    fn keys_are_distinct_around_origin() {
        let rect = TileRect::new(-2, -2, 2, 2);
        let keys: HashSet<String> = rect.keys().map(|key| key.to_string()).collect();
        assert_eq!(keys.len(), 25);
        assert!(keys.contains("0:0"));
        assert!(keys.contains("-1:0"));
        assert!(keys.contains("0:-1"));
    }

    #[test]
    fn parses_display_form() {
        let key: TileKey = "-12:34".parse().unwrap();
        assert_eq!(key, TileKey::new(-12, 34));
        assert_eq!(key.to_string().parse::<TileKey>().unwrap(), key);
        assert!("12".parse::<TileKey>().is_err());
        assert!("a:b".parse::<TileKey>().is_err());
    }

    #[test]
    fn rect_distance_is_chebyshev() {
        let rect = TileRect::new(0, 0, 3, 3);
        assert_eq!(rect.distance_to(TileKey::new(2, 2)), 0);
        assert_eq!(rect.distance_to(TileKey::new(5, 1)), 2);
        assert_eq!(rect.distance_to(TileKey::new(-3, 7)), 4);
        assert_eq!(rect.len(), 16);
    }
}
