use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use scrawl_client_core::cache::{TILE_CELLS, Tile, TileKey, TileRect, shared_store};
use scrawl_client_core::config::EngineConfig;
use scrawl_client_core::edit::EditPipeline;
use scrawl_client_core::gateway::http::HttpGateway;
use scrawl_client_core::gateway::memory::MemoryBackend;
use scrawl_client_core::gateway::wire::RectQuery;
use scrawl_client_core::gateway::{GatewayError, PatchRequest, TileGateway};
use tokio::net::TcpListener;

async fn fetch_tiles(
    State(backend): State<Arc<MemoryBackend>>,
    Query(query): Query<RectQuery>,
) -> Response {
    let rect = TileRect::new(query.min_x, query.min_y, query.max_x, query.max_y);
    match backend.fetch_tiles(rect).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn patch_tile(
    State(backend): State<Arc<MemoryBackend>>,
    Json(patch): Json<PatchRequest>,
) -> Response {
    match backend.patch_tile(patch).await {
        Ok(ack) => Json(ack).into_response(),
        Err(err) if err.is_conflict() => (StatusCode::CONFLICT, err.to_string()).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

/// Serves `backend` over the REST surface and returns the base url.
async fn serve(backend: Arc<MemoryBackend>) -> String {
    let app = Router::new()
        .route("/canvas/api/tiles", get(fetch_tiles))
        .route("/canvas/api/tiles/patch", post(patch_tile))
        .with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/canvas")
}

fn patch(key: TileKey, offset: usize, text: &str, known_version: u64) -> PatchRequest {
    PatchRequest {
        x: key.x,
        y: key.y,
        offset,
        text: text.into(),
        known_version,
        color_hex: None,
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn fetches_only_existing_tiles_in_rect() {
    let backend = Arc::new(MemoryBackend::default());
    let data: String = "hello".chars().chain(std::iter::repeat(' ')).take(TILE_CELLS).collect();
    backend.seed(Tile::from_wire(TileKey::new(-2, 3), &data, None, 4));
    backend.seed(Tile::from_wire(TileKey::new(9, 9), &data, None, 1));
    let gateway = HttpGateway::new(&serve(backend).await, None).expect("gateway");

    let records = gateway
        .fetch_tiles(TileRect::new(-3, 0, 0, 5))
        .await
        .expect("fetch");
    assert_eq!(records.len(), 1);
    let tile = records[0].clone().into_tile();
    assert_eq!(tile.key, TileKey::new(-2, 3));
    assert_eq!(tile.version, 4);
    assert_eq!(tile.char_at(0), Some('h'));
    assert_eq!(tile.char_at(5), Some(' '));
}

#[test_timeout::tokio_timeout_test(10)]
async fn patch_ack_and_conflict_map_to_gateway_results() {
    let backend = Arc::new(MemoryBackend::default());
    let gateway = HttpGateway::new(&serve(backend.clone()).await, None).expect("gateway");

    let ack = gateway
        .patch_tile(patch(TileKey::ORIGIN, 3, "a", 0))
        .await
        .expect("accepted");
    assert_eq!(ack.version, 1);
    assert_eq!(backend.tile(TileKey::ORIGIN).unwrap().char_at(3), Some('a'));

    let err = gateway
        .patch_tile(patch(TileKey::ORIGIN, 4, "b", 0))
        .await
        .expect_err("stale version");
    assert!(err.is_conflict(), "{err:?}");
    assert_eq!(backend.tile(TileKey::ORIGIN).unwrap().char_at(4), Some(' '));
}

#[test_timeout::tokio_timeout_test(10)]
async fn server_errors_surface_status_and_body() {
    let backend = Arc::new(MemoryBackend::default());
    backend.fail_next_fetches(1);
    let gateway = HttpGateway::new(&serve(backend).await, None).expect("gateway");

    let err = gateway
        .fetch_tiles(TileRect::new(0, 0, 0, 0))
        .await
        .expect_err("injected failure");
    match err {
        GatewayError::UnexpectedStatus { status, body } => {
            assert_eq!(status, 503);
            assert!(!body.is_empty());
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn stale_edit_over_http_resyncs() {
    let backend = Arc::new(MemoryBackend::default());
    let fresh: String = "remote ".chars().cycle().take(TILE_CELLS).collect();
    backend.seed(Tile::from_wire(TileKey::ORIGIN, &fresh, None, 5));
    let gateway: Arc<dyn TileGateway> =
        Arc::new(HttpGateway::new(&serve(backend.clone()).await, None).expect("gateway"));

    let store = shared_store();
    let pipeline = EditPipeline::new(store.clone(), gateway, &EngineConfig::default());
    pipeline.submit_edit(TileKey::ORIGIN, 2, 'Z', None).await;
    pipeline.idle().await;

    let store = store.lock();
    let tile = store.get(TileKey::ORIGIN).expect("resynced");
    assert_eq!(tile.version, 5);
    assert_eq!(tile.char_at(2), fresh.chars().nth(2));
    assert!(!store.has_pending(TileKey::ORIGIN));
}
