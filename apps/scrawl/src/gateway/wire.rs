//! JSON shapes exchanged with the tile service and the realtime hub.

use serde::{Deserialize, Serialize};

use crate::cache::{Tile, TileKey, Version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    pub x: i64,
    pub y: i64,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub version: Version,
}

impl TileRecord {
    pub fn key(&self) -> TileKey {
        TileKey::new(self.x, self.y)
    }

    /// Normalizing conversion, see [`Tile::from_wire`].
    pub fn into_tile(self) -> Tile {
        Tile::from_wire(self.key(), &self.data, self.color.as_deref(), self.version)
    }
}

impl From<&Tile> for TileRecord {
    fn from(tile: &Tile) -> Self {
        Self {
            x: tile.key.x,
            y: tile.key.y,
            data: tile.data_string(),
            color: tile.color_string(),
            version: tile.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub x: i64,
    pub y: i64,
    pub offset: usize,
    pub text: String,
    pub known_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_hex: Option<String>,
}

impl PatchRequest {
    pub fn key(&self) -> TileKey {
        TileKey::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAck {
    pub version: Version,
}

/// Query string for a rectangle fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectQuery {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

/// Pushed by the hub after the server accepts a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePatched {
    pub x: i64,
    pub y: i64,
    pub offset: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub version: Version,
}

/// Presence hint, sent by clients and relayed to peers as `peerTyping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTyping {
    pub x: i64,
    pub y: i64,
    pub col: i64,
    pub row: i64,
    pub sender: String,
}
