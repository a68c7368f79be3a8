use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::CellPos;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

/// Client configuration: where the tile service lives and how the engine is
/// tuned.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the tile service (defaults to `http://127.0.0.1:8080`).
    pub server: String,
    pub engine: EngineConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let server = env::var("SCRAWL_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string());
        Self {
            server: normalize_server(&server),
            engine: EngineConfig::default(),
        }
    }

    /// Override the tile service URL, normalized the same way as the env.
    pub fn with_server(mut self, server: &str) -> Self {
        self.server = normalize_server(server);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            engine: EngineConfig::default(),
        }
    }
}

/// Normalize localhost to IPv4 and add a scheme when missing.
fn normalize_server(raw: &str) -> String {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    with_scheme.replacen("://localhost", "://127.0.0.1", 1)
}

/// Cell-space rectangle, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CellRegion {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl CellRegion {
    pub fn contains(&self, cell: CellPos) -> bool {
        (self.min_x..=self.max_x).contains(&cell.x) && (self.min_y..=self.max_y).contains(&cell.y)
    }
}

/// Engine tunables. Every field has a default so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pixel size of one character cell.
    pub cell_width: f64,
    pub cell_height: f64,
    /// Extra tiles fetched beyond each edge of the visible area.
    pub tile_margin: i64,
    pub refresh_debounce_ms: u64,
    /// Soft upper bound on resident tiles.
    pub cache_capacity: usize,
    pub patch_queue_capacity: usize,
    pub patch_worker_idle_ms: u64,
    pub presence_ttl_ms: u64,
    pub typing_interval_ms: u64,
    pub physics: PhysicsConfig,
    pub teleport: TeleportConfig,
    /// Regions where teleport never places the caret.
    pub protected_regions: Vec<CellRegion>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cell_width: 10.0,
            cell_height: 20.0,
            tile_margin: 1,
            refresh_debounce_ms: 80,
            cache_capacity: 4096,
            patch_queue_capacity: 256,
            patch_worker_idle_ms: 30_000,
            presence_ttl_ms: 3_000,
            typing_interval_ms: 150,
            physics: PhysicsConfig::default(),
            teleport: TeleportConfig::default(),
            protected_regions: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn patch_worker_idle(&self) -> Duration {
        Duration::from_millis(self.patch_worker_idle_ms)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_millis(self.presence_ttl_ms)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    pub fn is_protected(&self, cell: CellPos) -> bool {
        self.protected_regions.iter().any(|region| region.contains(cell))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub sample_limit: usize,
    pub sample_window_ms: u64,
    /// Tail of the drag inspected to detect an intentional stop.
    pub quiet_window_ms: u64,
    pub quiet_distance_px: f64,
    /// Scale applied to the release velocity.
    pub release_damping: f64,
    /// Exponential decay rate `k` in `v *= exp(-k * dt)`, per second.
    pub decay_per_sec: f64,
    /// Fling stops once squared speed (px/s) falls below this.
    pub min_speed_sq: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            sample_limit: 8,
            sample_window_ms: 100,
            quiet_window_ms: 25,
            quiet_distance_px: 4.0,
            release_damping: 0.9,
            decay_per_sec: 4.0,
            min_speed_sq: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeleportConfig {
    pub duration_ms: u64,
    /// Cells per coarse display unit.
    pub display_unit_cells: i64,
    /// Teleport targets are clamped to +/- this many cells per axis.
    pub max_abs_cell: i64,
}

impl Default for TeleportConfig {
    fn default() -> Self {
        Self {
            duration_ms: 600,
            display_unit_cells: 10,
            max_abs_cell: 1_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment tests must not interleave.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "http://127.0.0.1:8080");
        assert_eq!(config.engine.tile_margin, 1);
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = env::var("SCRAWL_SERVER").ok();

        unsafe {
            env::set_var("SCRAWL_SERVER", "localhost:9000");
        }
        let config = ClientConfig::from_env();
        assert_eq!(config.server, "http://127.0.0.1:9000");

        unsafe {
            if let Some(orig) = original {
                env::set_var("SCRAWL_SERVER", orig);
            } else {
                env::remove_var("SCRAWL_SERVER");
            }
        }
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            refresh_debounce_ms = 50

            [physics]
            decay_per_sec = 6.5

            [[protected_regions]]
            min_x = -5
            min_y = -5
            max_x = 5
            max_y = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.refresh_debounce(), Duration::from_millis(50));
        assert_eq!(config.physics.decay_per_sec, 6.5);
        assert_eq!(config.physics.sample_limit, 8);
        assert!(config.is_protected(CellPos::new(0, 0)));
        assert!(!config.is_protected(CellPos::new(6, 0)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(EngineConfig::from_toml_str("tile_margin = \"wide\"").is_err());
    }
}
