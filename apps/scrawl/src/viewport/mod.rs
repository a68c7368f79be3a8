//! Maps the camera onto tile space and keeps the resident/subscribed tile set
//! in step with what is on screen.

use crate::cache::{TILE_COLS, TILE_ROWS, TileRect};
use crate::camera::Camera;
use crate::config::EngineConfig;

pub mod controller;

pub use controller::{RefreshOutcome, ViewportController};

/// Pixel size of a single character cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellMetrics {
    pub width: f64,
    pub height: f64,
}

impl CellMetrics {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            width: config.cell_width.max(1.0),
            height: config.cell_height.max(1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Canvas that shows exactly `cols` x `rows` cells.
    pub fn cells(cols: u32, rows: u32, cell: CellMetrics) -> Self {
        Self::new(cols as f64 * cell.width, rows as f64 * cell.height)
    }
}

/// Tiles touched by the visible cell range, grown by `margin` tiles on every
/// side.
pub fn visible_tile_rect(
    camera: &Camera,
    canvas: CanvasSize,
    cell: CellMetrics,
    margin: i64,
) -> TileRect {
    let first_col = (camera.origin.x / cell.width).floor() as i64;
    let first_row = (camera.origin.y / cell.height).floor() as i64;
    let last_col = (((camera.origin.x + canvas.width.max(0.0)) / cell.width).ceil() as i64 - 1)
        .max(first_col);
    let last_row = (((camera.origin.y + canvas.height.max(0.0)) / cell.height).ceil() as i64 - 1)
        .max(first_row);

    let margin = margin.max(0);
    TileRect::new(
        first_col.div_euclid(TILE_COLS).saturating_sub(margin),
        first_row.div_euclid(TILE_ROWS).saturating_sub(margin),
        last_col.div_euclid(TILE_COLS).saturating_add(margin),
        last_row.div_euclid(TILE_ROWS).saturating_add(margin),
    )
}
