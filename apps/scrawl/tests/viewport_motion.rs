use std::sync::Arc;
use std::time::Duration;

use scrawl_client_core::cache::{CellPos, TILE_CELLS, Tile, TileKey, TileRect};
use scrawl_client_core::camera::{CoordUnit, Coordinate, Release, TeleportRequest, Vec2};
use scrawl_client_core::config::{CellRegion, EngineConfig};
use scrawl_client_core::edit::EditIntent;
use scrawl_client_core::gateway::TileGateway;
use scrawl_client_core::gateway::memory::MemoryBackend;
use scrawl_client_core::session::ViewSession;
use scrawl_client_core::viewport::{CanvasSize, CellMetrics, RefreshOutcome};
use tile_hub::{Dialect, LocalHub};
use tokio::time::{Instant, sleep};

struct Harness {
    hub: LocalHub,
    backend: Arc<MemoryBackend>,
    session: ViewSession,
}

async fn harness(config: EngineConfig) -> Harness {
    let hub = LocalHub::new(Dialect::JoinLeave);
    let backend = Arc::new(MemoryBackend::new(Some(hub.clone())));
    let canvas = CanvasSize::cells(32, 16, CellMetrics::from_config(&config));
    let gateway: Arc<dyn TileGateway> = backend.clone();
    let mut session = ViewSession::new(config, gateway, hub.connect(), canvas).expect("session");
    let outcome = session.start().await;
    assert!(outcome.is_applied(), "{outcome:?}");
    Harness {
        hub,
        backend,
        session,
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn motion_inside_the_same_rect_triggers_nothing() {
    let mut h = harness(EngineConfig::default()).await;
    // Park the camera away from tile edges first.
    h.session.teleport(TeleportRequest::to_cell(24, 8)).await;
    let fetches = h.backend.fetch_count();
    let joined = h.session.viewport().joined_tiles();

    let t0 = Instant::now();
    h.session.drag_begin(Vec2::new(100.0, 100.0), t0);
    h.session.drag_move(Vec2::new(97.0, 99.0), t0 + ms(10));
    h.session.drag_move(Vec2::new(95.0, 98.0), t0 + ms(20));
    assert!(!h.session.viewport().has_pending_refresh());

    sleep(ms(500)).await;
    assert_eq!(h.backend.fetch_count(), fetches);
    assert_eq!(h.session.viewport().joined_tiles(), joined);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn bursts_of_motion_collapse_into_one_refresh() {
    let mut h = harness(EngineConfig::default()).await;
    let fetches = h.backend.fetch_count();

    let t0 = Instant::now();
    h.session.drag_begin(Vec2::new(0.0, 0.0), t0);
    for step in 1..=5u64 {
        // 200 px per step crosses a tile boundary every time.
        h.session
            .drag_move(Vec2::new(-200.0 * step as f64, 0.0), t0 + ms(step));
    }
    assert!(h.session.viewport().has_pending_refresh());

    sleep(ms(40)).await;
    assert_eq!(h.backend.fetch_count(), fetches, "debounce still pending");
    sleep(ms(100)).await;
    assert_eq!(h.backend.fetch_count(), fetches + 1);

    // 1000 px right is 100 cells, so tiles 6 to 8 are on screen.
    let rect = h.session.viewport().visible_rect();
    assert_eq!(rect, TileRect::new(5, -1, 9, 1));
    assert!(h.session.snapshot(TileKey::new(9, 1)).is_some());
    assert_eq!(h.hub.member_count("-1:0"), 0);
    assert_eq!(h.hub.member_count("9:1"), 1);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn quiet_release_refreshes_once_without_fling() {
    let mut h = harness(EngineConfig::default()).await;
    let fetches = h.backend.fetch_count();

    let t0 = Instant::now();
    h.session.drag_begin(Vec2::new(400.0, 0.0), t0);
    h.session.drag_move(Vec2::new(200.0, 0.0), t0 + ms(10));
    h.session.drag_move(Vec2::new(198.0, 0.0), t0 + ms(40));
    h.session.drag_move(Vec2::new(197.0, 0.0), t0 + ms(50));

    let release = h.session.drag_end(t0 + ms(60)).await;
    assert_eq!(release, Release::Stop);
    assert!(!h.session.is_moving());
    assert_eq!(h.backend.fetch_count(), fetches + 1);

    // The debounced refresh from the drag was folded into the release.
    sleep(ms(500)).await;
    assert_eq!(h.backend.fetch_count(), fetches + 1);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn fast_release_flings_then_refreshes_once_at_rest() {
    let mut h = harness(EngineConfig::default()).await;

    let t0 = Instant::now();
    h.session.drag_begin(Vec2::new(0.0, 0.0), t0);
    for step in 1..=5u64 {
        h.session
            .drag_move(Vec2::new(-20.0 * step as f64, 0.0), t0 + ms(step * 10));
    }
    let before = h.session.camera().origin;
    let release = h.session.drag_end(t0 + ms(50)).await;
    let Release::Fling(velocity) = release else {
        panic!("expected a fling, got {release:?}");
    };
    assert!(velocity.x < -1000.0, "{velocity:?}");
    assert!(h.session.is_moving());

    h.session.animate().await;
    assert!(!h.session.is_moving());
    let after = h.session.camera().origin;
    assert!(after.x - before.x > 200.0, "camera kept moving right");

    let fetches = h.backend.fetch_count();
    sleep(ms(500)).await;
    assert_eq!(h.backend.fetch_count(), fetches, "no refresh after rest");
    let rect = h.session.viewport().visible_rect();
    let expected_tile = TileKey::new(rect.max_x, rect.max_y);
    assert!(h.session.snapshot(expected_tile).is_some());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn superseded_fetch_is_discarded() {
    let h = harness(EngineConfig::default()).await;
    h.backend.set_fetch_delay(Some(ms(100)));
    let viewport = h.session.viewport().clone();

    let first = viewport.refresh_viewport();
    let second = async {
        sleep(ms(10)).await;
        viewport.refresh_viewport().await
    };
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first, RefreshOutcome::Superseded);
    assert!(second.is_applied());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn failed_refresh_keeps_memberships() {
    let mut h = harness(EngineConfig::default()).await;
    let joined = h.session.viewport().joined_tiles();

    h.backend.fail_next_fetches(1);
    let t0 = Instant::now();
    h.session.drag_begin(Vec2::new(0.0, 0.0), t0);
    h.session.drag_move(Vec2::new(-3200.0, 0.0), t0 + ms(100));
    sleep(ms(200)).await;
    assert_eq!(h.session.viewport().joined_tiles(), joined);

    assert!(h.session.viewport().refresh_viewport().await.is_applied());
    assert_ne!(h.session.viewport().joined_tiles(), joined);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn animated_teleport_lands_and_places_caret() {
    let mut h = harness(EngineConfig::default()).await;
    let target = h
        .session
        .teleport(TeleportRequest {
            target: Coordinate {
                unit: CoordUnit::Tile,
                x: -1000.0,
                y: 250.0,
            },
            animate: true,
            recenter: true,
            place_caret: true,
        })
        .await;
    assert_eq!(target, CellPos::new(-16_000, 4_000));
    assert!(h.session.is_moving());

    h.session.animate().await;
    assert!(!h.session.is_moving());
    h.session.settle().await;
    assert_eq!(h.session.caret().pos, target);

    let rect = h.session.viewport().visible_rect();
    assert!(rect.contains(target.to_address().tile));
    assert!(h.session.snapshot(target.to_address().tile).is_some());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn teleport_into_protected_region_keeps_caret() {
    let config = EngineConfig {
        protected_regions: vec![CellRegion {
            min_x: 0,
            min_y: 0,
            max_x: 99,
            max_y: 99,
        }],
        ..EngineConfig::default()
    };
    let mut h = harness(config).await;
    let before = h.session.caret().pos;
    let fetches = h.backend.fetch_count();

    h.session
        .teleport(TeleportRequest {
            target: Coordinate {
                unit: CoordUnit::Display,
                x: 5.0,
                y: 5.0,
            },
            animate: false,
            recenter: false,
            place_caret: true,
        })
        .await;
    h.session.settle().await;
    assert_eq!(h.session.caret().pos, before);
    assert_eq!(h.backend.fetch_count(), fetches + 1);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn refetching_unchanged_tiles_keeps_pending_edit() {
    let h = harness(EngineConfig::default()).await;
    let cell = CellPos::new(3, 2);
    let addr = cell.to_address();
    h.backend
        .seed(Tile::from_wire(addr.tile, &"~".repeat(TILE_CELLS), None, 2));
    assert!(h.session.viewport().refresh_viewport().await.is_applied());

    h.backend.hold_patches();
    h.session.submit(EditIntent::Write {
        at: cell,
        text: "Q".into(),
    });
    h.session.settle_input().await;
    sleep(ms(10)).await;

    for _ in 0..2 {
        assert!(h.session.viewport().refresh_viewport().await.is_applied());
        let tile = h.session.snapshot(addr.tile).expect("resident");
        assert_eq!(tile.char_at(addr.offset), Some('Q'));
        assert_eq!(tile.char_at(0), Some('~'));
        assert_eq!(tile.version, 2);
    }

    h.backend.release_patches();
    h.session.settle().await;
    let server = h.backend.tile(addr.tile).expect("server tile");
    let local = h.session.snapshot(addr.tile).expect("resident");
    assert_eq!(server.char_at(addr.offset), Some('Q'));
    assert_eq!(server.version, 3);
    assert_eq!(local.version, server.version);
    assert_eq!(local.data(), server.data());
    assert!(!h.session.store().lock().has_pending(addr.tile));
}
