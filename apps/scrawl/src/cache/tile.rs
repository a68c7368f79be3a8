use std::fmt::Write as _;

use super::addressing::{TILE_CELLS, TileKey};

pub type Version = u64;

/// Packed `0xRRGGBB` foreground color. Zero means "no color set".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellColor(u32);

impl CellColor {
    pub const NONE: CellColor = CellColor(0);

    #[inline]
    pub const fn from_rgb(rgb: u32) -> Self {
        CellColor(rgb & 0x00FF_FFFF)
    }

    #[inline]
    pub fn rgb(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Parses exactly six hex digits, with or without a leading `#`.
    pub fn parse_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(CellColor::from_rgb)
    }

    pub fn to_hex(self) -> String {
        format!("{:06x}", self.0)
    }
}

/// One fully-sized tile. `data` and `color` always hold exactly
/// [`TILE_CELLS`] entries; constructors normalize anything else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub key: TileKey,
    data: Vec<char>,
    color: Option<Vec<CellColor>>,
    pub version: Version,
}

impl Tile {
    pub fn blank(key: TileKey) -> Self {
        Self {
            key,
            data: vec![' '; TILE_CELLS],
            color: None,
            version: 0,
        }
    }

    /// Build a tile from wire strings. A `data` string of the wrong length is
    /// replaced by the blank layout; a malformed `color` string is dropped.
    pub fn from_wire(key: TileKey, data: &str, color: Option<&str>, version: Version) -> Self {
        let mut tile = Tile::blank(key);
        tile.version = version;
        if data.chars().count() == TILE_CELLS {
            tile.data = data.chars().collect();
        } else {
            tracing::debug!(
                target = "scrawl::cache",
                tile = %key,
                len = data.chars().count(),
                "normalizing malformed tile data"
            );
        }
        tile.color = color.and_then(decode_colors);
        tile
    }

    pub fn data(&self) -> &[char] {
        &self.data
    }

    pub fn colors(&self) -> Option<&[CellColor]> {
        self.color.as_deref()
    }

    pub fn data_string(&self) -> String {
        self.data.iter().collect()
    }

    pub fn color_string(&self) -> Option<String> {
        self.color.as_ref().map(|colors| {
            let mut out = String::with_capacity(colors.len() * 6);
            for color in colors {
                let _ = write!(out, "{:06x}", color.rgb());
            }
            out
        })
    }

    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.data.get(offset).copied()
    }

    pub fn color_at(&self, offset: usize) -> CellColor {
        self.color
            .as_ref()
            .and_then(|colors| colors.get(offset).copied())
            .unwrap_or(CellColor::NONE)
    }

    /// Overwrite one cell. `color: None` leaves the cell's color untouched.
    /// Returns false when `offset` is outside the tile.
    pub fn write_cell(&mut self, offset: usize, ch: char, color: Option<CellColor>) -> bool {
        let Some(slot) = self.data.get_mut(offset) else {
            return false;
        };
        *slot = ch;
        if let Some(color) = color {
            self.colors_mut()[offset] = color;
        }
        true
    }

    /// Write `text` starting at `offset`, clipped at the end of the tile.
    /// `colors` is either one color for every written cell or one per char.
    /// Returns the number of cells written.
    pub fn splice(&mut self, offset: usize, text: &str, colors: Option<&[CellColor]>) -> usize {
        let mut written = 0;
        for (index, ch) in text.chars().enumerate() {
            let Some(target) = offset.checked_add(index) else {
                break;
            };
            if target >= TILE_CELLS {
                break;
            }
            let color = colors.and_then(|colors| match colors.len() {
                0 => None,
                1 => Some(colors[0]),
                _ => colors.get(index).copied(),
            });
            self.write_cell(target, ch, color);
            written += 1;
        }
        written
    }

    fn colors_mut(&mut self) -> &mut Vec<CellColor> {
        self.color
            .get_or_insert_with(|| vec![CellColor::NONE; TILE_CELLS])
    }
}

fn decode_colors(hex: &str) -> Option<Vec<CellColor>> {
    if hex.len() != TILE_CELLS * 6 {
        return None;
    }
    parse_color_run(hex)
}

/// Parse a concatenation of six-digit hex colors.
pub fn parse_color_run(hex: &str) -> Option<Vec<CellColor>> {
    if hex.is_empty() || hex.len() % 6 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(6)
        .map(|start| CellColor::parse_hex(&hex[start..start + 6]))
        .collect()
}
