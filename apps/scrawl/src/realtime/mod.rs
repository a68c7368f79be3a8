//! Inbound realtime events and the merge/presence state they feed.

use thiserror::Error;
use tile_hub::{EVENT_PEER_TYPING, EVENT_RECONNECTED, EVENT_TILE_PATCHED, HubMessage};

use crate::gateway::{PeerTyping, TilePatched};

pub mod channel;
pub mod merge;
pub mod presence;

pub use channel::TileChannel;
pub use merge::{MergeOutcome, apply_remote_patch};
pub use presence::{PeerCursor, PresenceBoard, TypingThrottle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    TilePatched(TilePatched),
    PeerTyping(PeerTyping),
    Reconnected,
    Unknown(String),
}

#[derive(Debug, Error)]
#[error("malformed {event} payload: {source}")]
pub struct DecodeError {
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

pub fn decode(message: &HubMessage) -> Result<HubEvent, DecodeError> {
    let wrap = |source| DecodeError {
        event: message.event.clone(),
        source,
    };
    match message.event.as_str() {
        EVENT_TILE_PATCHED => serde_json::from_slice(&message.payload)
            .map(HubEvent::TilePatched)
            .map_err(wrap),
        EVENT_PEER_TYPING => serde_json::from_slice(&message.payload)
            .map(HubEvent::PeerTyping)
            .map_err(wrap),
        EVENT_RECONNECTED => Ok(HubEvent::Reconnected),
        other => Ok(HubEvent::Unknown(other.to_string())),
    }
}
