//! Remote tile service: rectangle fetches and single-cell patches.
//!
//! The engine only talks to [`TileGateway`]; [`http::HttpGateway`] speaks the
//! REST API and [`memory::MemoryBackend`] is an authoritative in-process
//! backend for tests and offline sessions.

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{TileKey, TileRect, Version};

pub mod http;
pub mod memory;
pub mod wire;

pub use wire::{PatchAck, PatchRequest, PeerTyping, TilePatched, TileRecord};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("patch to tile {key} rejected: known version {known} is stale")]
    Conflict { key: TileKey, known: Version },
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid service url: {0}")]
    Url(#[from] url::ParseError),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict { .. })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait TileGateway: Send + Sync {
    /// Fetch every existing tile inside `rect`. Coordinates with no tile on
    /// the server are simply absent from the response.
    async fn fetch_tiles(&self, rect: TileRect) -> GatewayResult<Vec<TileRecord>>;

    /// Submit one patch guarded by `known_version`. A stale version must come
    /// back as [`GatewayError::Conflict`].
    async fn patch_tile(&self, patch: PatchRequest) -> GatewayResult<PatchAck>;
}
