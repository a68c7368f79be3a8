use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use super::{Camera, Vec2};
use crate::cache::{CellPos, TILE_COLS, TILE_ROWS};
use crate::config::TeleportConfig;
use crate::viewport::{CanvasSize, CellMetrics};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordUnit {
    #[default]
    Cell,
    Tile,
    /// Coarse unit shown to users; a fixed number of cells per step.
    Display,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Coordinate {
    #[serde(default)]
    pub unit: CoordUnit,
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn cell(x: i64, y: i64) -> Self {
        Self {
            unit: CoordUnit::Cell,
            x: x as f64,
            y: y as f64,
        }
    }

    /// Resolve to an absolute cell, clamped to the configured bound on
    /// each axis.
    pub fn to_cell(&self, config: &TeleportConfig) -> CellPos {
        let (sx, sy) = match self.unit {
            CoordUnit::Cell => (1.0, 1.0),
            CoordUnit::Tile => (TILE_COLS as f64, TILE_ROWS as f64),
            CoordUnit::Display => {
                let unit = config.display_unit_cells as f64;
                (unit, unit)
            }
        };
        let bound = config.max_abs_cell.abs();
        let clamp = |value: f64| {
            if value.is_nan() {
                return 0;
            }
            // `as` saturates, the clamp enforces the configured bound.
            (value.floor() as i64).clamp(-bound, bound)
        };
        CellPos::new(clamp(self.x * sx), clamp(self.y * sy))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TeleportRequest {
    pub target: Coordinate,
    #[serde(default)]
    pub animate: bool,
    /// Center the target even when it is already on screen.
    #[serde(default)]
    pub recenter: bool,
    #[serde(default)]
    pub place_caret: bool,
}

impl TeleportRequest {
    pub fn to_cell(x: i64, y: i64) -> Self {
        Self {
            target: Coordinate::cell(x, y),
            animate: false,
            recenter: true,
            place_caret: false,
        }
    }
}

pub fn ease_in_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Camera origin for a teleport to `target`, or `None` when the camera can
/// stay where it is because the cell is already visible and no recentering
/// was asked for.
pub fn destination(
    camera: &Camera,
    canvas: CanvasSize,
    cell: CellMetrics,
    target: CellPos,
    recenter: bool,
) -> Option<Vec2> {
    let top_left = Vec2::new(target.x as f64 * cell.width, target.y as f64 * cell.height);
    if !recenter {
        let rel = top_left - camera.origin;
        let visible = rel.x >= 0.0
            && rel.y >= 0.0
            && rel.x + cell.width <= canvas.width
            && rel.y + cell.height <= canvas.height;
        if visible {
            return None;
        }
    }
    let center = top_left + Vec2::new(cell.width / 2.0, cell.height / 2.0);
    Some(center - Vec2::new(canvas.width / 2.0, canvas.height / 2.0))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TeleportAnimation {
    from: Vec2,
    to: Vec2,
    start: Instant,
    duration: Duration,
}

impl TeleportAnimation {
    pub fn new(from: Vec2, to: Vec2, start: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            start,
            duration,
        }
    }

    pub fn target(&self) -> Vec2 {
        self.to
    }

    /// Camera origin at `now` and whether the animation has finished.
    pub fn sample(&self, now: Instant) -> (Vec2, bool) {
        if self.duration.is_zero() {
            return (self.to, true);
        }
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration {
            return (self.to, true);
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        (self.from.lerp(self.to, ease_in_out_cubic(t)), false)
    }
}
