use crate::cache::tile::parse_color_run;
use crate::cache::{TileKey, TileStore, Version};
use crate::gateway::TilePatched;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The tile is not resident; nothing was created.
    NotResident,
    /// The tile already reflects this version or a newer one.
    Stale { current: Version },
    Applied { written: usize, replayed: usize },
}

/// Fold a pushed patch into the store. The event's text is spliced in, its
/// version adopted, and any unconfirmed local edits for the tile replayed on
/// top so a remote write to a neighbouring cell cannot erase them.
pub fn apply_remote_patch(store: &mut TileStore, event: &TilePatched) -> MergeOutcome {
    let key = TileKey::new(event.x, event.y);
    let Some(tile) = store.get_mut(key) else {
        return MergeOutcome::NotResident;
    };
    if event.version <= tile.version {
        return MergeOutcome::Stale {
            current: tile.version,
        };
    }
    let colors = event.color.as_deref().and_then(parse_color_run);
    let written = tile.splice(event.offset, &event.text, colors.as_deref());
    tile.version = event.version;
    let replayed = store.reapply_overlay(key);
    MergeOutcome::Applied { written, replayed }
}
