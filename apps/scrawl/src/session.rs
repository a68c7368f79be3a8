//! One view onto the canvas: camera, caches, edit queues and the realtime
//! channel, owned together and torn down together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tile_hub::{HubConnection, HubMessage, HubResult};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::cache::addressing::offset_to_local;
use crate::cache::{CellPos, SharedStore, Tile, TileKey, shared_store};
use crate::camera::teleport::destination;
use crate::camera::{
    Camera, DragTracker, Fling, Release, TeleportAnimation, TeleportRequest, Vec2,
};
use crate::config::EngineConfig;
use crate::edit::{Caret, EditIntent, EditPipeline, InputQueue};
use crate::gateway::TileGateway;
use crate::realtime::{
    HubEvent, MergeOutcome, PeerCursor, PresenceBoard, TileChannel, TypingThrottle,
    apply_remote_patch, decode,
};
use crate::viewport::{CanvasSize, RefreshOutcome, ViewportController};

const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

#[derive(Clone, Copy, Debug)]
struct ActiveTeleport {
    animation: TeleportAnimation,
    caret: Option<CellPos>,
}

pub struct ViewSession {
    config: EngineConfig,
    store: SharedStore,
    pipeline: EditPipeline,
    input: InputQueue,
    viewport: ViewportController,
    channel: Arc<TileChannel>,
    presence: Arc<Mutex<PresenceBoard>>,
    throttle: Arc<Mutex<TypingThrottle>>,
    events: Option<broadcast::Receiver<HubMessage>>,
    tasks: Vec<JoinHandle<()>>,
    drag: DragTracker,
    dragging: bool,
    fling: Option<Fling>,
    teleport: Option<ActiveTeleport>,
    last_frame: Option<Instant>,
}

impl ViewSession {
    /// Build a session around a gateway and a hub connection. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn TileGateway>,
        conn: Arc<dyn HubConnection>,
        canvas: CanvasSize,
    ) -> HubResult<Self> {
        let sender_id = Uuid::new_v4().to_string();
        let channel = Arc::new(TileChannel::negotiate(conn, sender_id)?);
        // Subscribe before anything is joined so no push can be missed.
        let events = channel.subscribe();
        let store = shared_store();
        let pipeline = EditPipeline::new(store.clone(), Arc::clone(&gateway), &config);
        let input = InputQueue::spawn(
            pipeline.clone(),
            config.protected_regions.clone(),
            Caret::default(),
        );
        let viewport = ViewportController::new(
            store.clone(),
            gateway,
            Arc::clone(&channel),
            &config,
            Camera::default(),
            canvas,
        );
        Ok(Self {
            presence: Arc::new(Mutex::new(PresenceBoard::new(config.presence_ttl()))),
            throttle: Arc::new(Mutex::new(TypingThrottle::new(config.typing_interval()))),
            drag: DragTracker::new(&config.physics),
            config,
            store,
            pipeline,
            input,
            viewport,
            channel,
            events: Some(events),
            tasks: Vec::new(),
            dragging: false,
            fling: None,
            teleport: None,
            last_frame: None,
        })
    }

    /// Spawn the event pump and caret relay, then load the initial view.
    pub async fn start(&mut self) -> RefreshOutcome {
        if let Some(events) = self.events.take() {
            self.tasks.push(tokio::spawn(pump_events(
                events,
                self.store.clone(),
                Arc::clone(&self.presence),
                self.viewport.clone(),
                self.channel.sender_id().to_string(),
            )));
            self.tasks.push(tokio::spawn(relay_caret(
                self.input.watch_caret(),
                Arc::clone(&self.channel),
                Arc::clone(&self.throttle),
            )));
        }
        self.viewport.refresh_viewport().await
    }

    pub fn sender_id(&self) -> &str {
        self.channel.sender_id()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn pipeline(&self) -> &EditPipeline {
        &self.pipeline
    }

    pub fn camera(&self) -> Camera {
        self.viewport.camera()
    }

    pub fn caret(&self) -> Caret {
        self.input.caret()
    }

    pub fn is_moving(&self) -> bool {
        self.fling.is_some() || self.teleport.is_some()
    }

    pub fn resize(&mut self, canvas: CanvasSize) {
        self.viewport.set_canvas(canvas);
        self.viewport.on_camera_moved();
    }

    pub fn drag_begin(&mut self, pointer: Vec2, now: Instant) {
        self.fling = None;
        self.teleport = None;
        self.drag.reset();
        self.drag.push(pointer, now);
        self.dragging = true;
    }

    pub fn drag_move(&mut self, pointer: Vec2, now: Instant) {
        if !self.dragging {
            return;
        }
        if let Some(previous) = self.drag.last() {
            self.pan(previous - pointer);
        }
        self.drag.push(pointer, now);
        self.viewport.on_camera_moved();
    }

    /// Lift the pointer. A stop refreshes right away; a fling keeps the
    /// camera moving through [`ViewSession::tick`].
    pub async fn drag_end(&mut self, now: Instant) -> Release {
        if !self.dragging {
            return Release::Stop;
        }
        self.dragging = false;
        let release = self.drag.release(now);
        self.drag.reset();
        match release {
            Release::Stop => {
                self.viewport.refresh_viewport().await;
            }
            Release::Fling(velocity) => {
                trace!(target = "scrawl::camera", ?velocity, "fling started");
                self.fling = Some(Fling::new(velocity, &self.config.physics));
                self.last_frame = Some(now);
            }
        }
        release
    }

    /// Advance motion by one frame. Returns whether anything is still moving.
    pub async fn tick(&mut self, now: Instant) -> bool {
        let dt = self
            .last_frame
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_frame = Some(now);

        if let Some(active) = self.teleport {
            let (origin, done) = active.animation.sample(now);
            self.viewport.set_camera(Camera { origin });
            if !done {
                return true;
            }
            self.teleport = None;
            self.finish_teleport(active.caret).await;
            return false;
        }

        let Some(fling) = self.fling.as_mut() else {
            return false;
        };
        match fling.step(dt) {
            Some(delta) => {
                self.pan(-delta);
                self.viewport.on_camera_moved();
                true
            }
            None => {
                self.fling = None;
                debug!(target = "scrawl::camera", "fling settled");
                self.viewport.refresh_viewport().await;
                false
            }
        }
    }

    /// Headless frame loop: ticks at 60 Hz until motion stops.
    pub async fn animate(&mut self) {
        if !self.is_moving() {
            return;
        }
        let mut frames = tokio::time::interval(FRAME_INTERVAL);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let now = frames.tick().await;
            if !self.tick(now).await {
                break;
            }
        }
    }

    /// Move the camera to `request.target`. Animated teleports finish in
    /// [`ViewSession::tick`]; others refresh before returning. Returns the
    /// clamped destination cell.
    pub async fn teleport(&mut self, request: TeleportRequest) -> CellPos {
        let target = request.target.to_cell(&self.config.teleport);
        let caret = if !request.place_caret {
            None
        } else if self.config.is_protected(target) {
            debug!(target = "scrawl::camera", ?target, "caret not placed in protected region");
            None
        } else {
            Some(target)
        };

        self.fling = None;
        self.dragging = false;
        let camera = self.viewport.camera();
        let to = destination(
            &camera,
            self.viewport.canvas(),
            self.viewport.cell_metrics(),
            target,
            request.recenter,
        );
        debug!(target = "scrawl::camera", ?target, animate = request.animate, "teleport");
        match to {
            Some(to) if request.animate => {
                let now = Instant::now();
                self.teleport = Some(ActiveTeleport {
                    animation: TeleportAnimation::new(
                        camera.origin,
                        to,
                        now,
                        Duration::from_millis(self.config.teleport.duration_ms),
                    ),
                    caret,
                });
                self.last_frame = Some(now);
            }
            other => {
                self.teleport = None;
                if let Some(origin) = other {
                    self.viewport.set_camera(Camera { origin });
                }
                self.finish_teleport(caret).await;
            }
        }
        target
    }

    async fn finish_teleport(&mut self, caret: Option<CellPos>) {
        self.viewport.refresh_viewport().await;
        if let Some(cell) = caret {
            self.input.submit(EditIntent::PlaceCaret(cell));
        }
    }

    fn pan(&mut self, delta: Vec2) {
        let mut camera = self.viewport.camera();
        camera.pan(delta);
        self.viewport.set_camera(camera);
    }

    pub fn submit(&self, intent: EditIntent) -> bool {
        self.input.submit(intent)
    }

    /// Resolves once every submitted intent has run. Patches may still be in
    /// flight.
    pub async fn settle_input(&self) {
        self.input.drain().await;
    }

    /// Resolves once every submitted intent has run and every resulting
    /// patch has settled.
    pub async fn settle(&self) {
        self.input.drain().await;
        self.pipeline.idle().await;
    }

    /// Announce the caret position to peers, subject to the typing throttle.
    pub fn send_typing_hint(&self) -> bool {
        if !self.throttle.lock().ready(Instant::now()) {
            return false;
        }
        announce(&self.channel, self.input.caret().pos)
    }

    pub fn peers(&self) -> Vec<(String, PeerCursor)> {
        self.presence.lock().peers(Instant::now())
    }

    pub fn snapshot(&self, key: TileKey) -> Option<Tile> {
        self.store.lock().get(key).cloned()
    }

    /// Text of a `cols` x `rows` block starting at `origin`. Cells of tiles
    /// that are not resident read as blanks.
    pub fn read_text(&self, origin: CellPos, cols: u32, rows: u32) -> Vec<String> {
        let store = self.store.lock();
        (0..rows as i64)
            .map(|dy| {
                (0..cols as i64)
                    .map(|dx| {
                        let addr = origin.offset_by(dx, dy).to_address();
                        store
                            .get(addr.tile)
                            .and_then(|tile| tile.char_at(addr.offset))
                            .unwrap_or(' ')
                    })
                    .collect()
            })
            .collect()
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.viewport.shutdown();
        self.input.shutdown();
        debug!(target = "scrawl::session", "view session shut down");
    }
}

impl Drop for ViewSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn announce(channel: &TileChannel, pos: CellPos) -> bool {
    let addr = pos.to_address();
    let (col, row) = offset_to_local(addr.offset);
    channel.send_typing(addr.tile, col, row)
}

/// Announces caret moves to peers. A move that lands inside the throttle
/// interval is held and sent once the interval expires, so the last position
/// of a burst always goes out.
async fn relay_caret(
    mut caret: watch::Receiver<Caret>,
    channel: Arc<TileChannel>,
    throttle: Arc<Mutex<TypingThrottle>>,
) {
    let mut held: Option<CellPos> = None;
    loop {
        let wait = held.map(|_| throttle.lock().remaining(Instant::now()));
        let changed = match wait {
            Some(wait) => {
                tokio::select! {
                    changed = caret.changed() => Some(changed),
                    _ = tokio::time::sleep(wait) => None,
                }
            }
            None => Some(caret.changed().await),
        };
        match changed {
            Some(Ok(())) => held = Some(caret.borrow_and_update().pos),
            Some(Err(_)) => break,
            None => {}
        }
        if let Some(pos) = held {
            if throttle.lock().ready(Instant::now()) {
                announce(&channel, pos);
                held = None;
            }
        }
    }
}

async fn pump_events(
    mut events: broadcast::Receiver<HubMessage>,
    store: SharedStore,
    presence: Arc<Mutex<PresenceBoard>>,
    viewport: ViewportController,
    self_id: String,
) {
    loop {
        let message = match events.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target = "scrawl::realtime", skipped, "event pump lagged; refetching view");
                let viewport = viewport.clone();
                tokio::spawn(async move {
                    viewport.refresh_viewport().await;
                });
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match decode(&message) {
            Ok(HubEvent::TilePatched(event)) => {
                let outcome = apply_remote_patch(&mut store.lock(), &event);
                if let MergeOutcome::Stale { current } = outcome {
                    trace!(
                        target = "scrawl::realtime",
                        tile = %message.group,
                        version = event.version,
                        current,
                        "skipping stale push"
                    );
                } else {
                    trace!(target = "scrawl::realtime", tile = %message.group, ?outcome, "push merged");
                }
            }
            Ok(HubEvent::PeerTyping(hint)) => {
                if hint.sender != self_id {
                    presence.lock().record(
                        &hint.sender,
                        TileKey::new(hint.x, hint.y),
                        hint.col,
                        hint.row,
                        Instant::now(),
                    );
                }
            }
            Ok(HubEvent::Reconnected) => {
                let viewport = viewport.clone();
                tokio::spawn(async move {
                    viewport.on_reconnected().await;
                });
            }
            Ok(HubEvent::Unknown(event)) => {
                trace!(target = "scrawl::realtime", event = %event, "ignoring unknown event");
            }
            Err(err) => {
                warn!(target = "scrawl::realtime", error = %err, "dropping undecodable event");
            }
        }
    }
    debug!(target = "scrawl::realtime", "event pump stopped");
}
