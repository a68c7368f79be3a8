use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use super::wire::RectQuery;
use super::{GatewayError, GatewayResult, PatchAck, PatchRequest, TileGateway, TileRecord};
use crate::cache::TileRect;

/// REST client for the tile service.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str, request_timeout: Option<Duration>) -> GatewayResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url)?)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn unexpected(res: reqwest::Response) -> GatewayError {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        GatewayError::UnexpectedStatus { status, body }
    }
}

#[async_trait]
impl TileGateway for HttpGateway {
    async fn fetch_tiles(&self, rect: TileRect) -> GatewayResult<Vec<TileRecord>> {
        let url = self.base_url.join("api/tiles")?;
        let query = RectQuery {
            min_x: rect.min_x,
            max_x: rect.max_x,
            min_y: rect.min_y,
            max_y: rect.max_y,
        };
        trace!(target = "scrawl::gateway", %rect, "fetching tiles");
        let res = self.http.get(url).query(&query).send().await?;
        if res.status().is_success() {
            Ok(res.json::<Vec<TileRecord>>().await?)
        } else {
            Err(Self::unexpected(res).await)
        }
    }

    async fn patch_tile(&self, patch: PatchRequest) -> GatewayResult<PatchAck> {
        let url = self.base_url.join("api/tiles/patch")?;
        let key = patch.key();
        let known = patch.known_version;
        trace!(
            target = "scrawl::gateway",
            tile = %key,
            offset = patch.offset,
            known_version = known,
            "submitting patch"
        );
        let res = self.http.post(url).json(&patch).send().await?;
        match res.status() {
            status if status.is_success() => Ok(res.json::<PatchAck>().await?),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(GatewayError::Conflict { key, known })
            }
            _ => Err(Self::unexpected(res).await),
        }
    }
}
