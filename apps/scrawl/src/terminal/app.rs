use std::sync::Arc;
use std::time::Duration;

use tile_hub::{Dialect, LocalHub};
use tracing::info;

use crate::cache::{CellColor, CellPos, TileKey};
use crate::camera::TeleportRequest;
use crate::config::{ClientConfig, EngineConfig};
use crate::edit::{Caret, EditIntent};
use crate::gateway::TileGateway;
use crate::gateway::http::HttpGateway;
use crate::gateway::memory::MemoryBackend;
use crate::session::ViewSession;
use crate::terminal::cli::{Cli, Command, DumpArgs, WriteArgs};
use crate::terminal::error::CliError;
use crate::viewport::{CanvasSize, CellMetrics};

const WRITE_CANVAS: (u32, u32) = (64, 16);

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env();
    if let Some(server) = cli.server.as_deref() {
        config = config.with_server(server);
    }
    if let Some(path) = cli.config.as_deref() {
        config.engine = EngineConfig::load(path)?;
    }

    // Pushes only exist in-process; against the HTTP service the hub has no
    // publisher and the session runs on fetches alone.
    let hub = LocalHub::new(Dialect::JoinLeave);
    let gateway: Arc<dyn TileGateway> = if cli.offline {
        info!(target = "scrawl::cli", "using in-process tile service");
        Arc::new(MemoryBackend::new(Some(hub.clone())))
    } else {
        let timeout = (cli.request_timeout > 0).then(|| Duration::from_secs(cli.request_timeout));
        info!(target = "scrawl::cli", server = %config.server, "using tile service");
        Arc::new(HttpGateway::new(&config.server, timeout)?)
    };

    match cli.command {
        Command::Dump(args) => dump(config.engine, gateway, &hub, args).await,
        Command::Write(args) => write(config.engine, gateway, &hub, args).await,
    }
}

async fn dump(
    engine: EngineConfig,
    gateway: Arc<dyn TileGateway>,
    hub: &LocalHub,
    args: DumpArgs,
) -> Result<(), CliError> {
    if args.cols == 0 || args.rows == 0 {
        return Err(CliError::InvalidArgument("cols and rows must be positive".into()));
    }
    let canvas = CanvasSize::cells(args.cols, args.rows, CellMetrics::from_config(&engine));
    let mut session = ViewSession::new(engine, gateway, hub.connect(), canvas)?;
    session.start().await;

    let center = CellPos::new(
        args.x.saturating_add(i64::from(args.cols / 2)),
        args.y.saturating_add(i64::from(args.rows / 2)),
    );
    session.teleport(TeleportRequest::to_cell(center.x, center.y)).await;

    let origin = CellPos::new(args.x, args.y);
    for line in session.read_text(origin, args.cols, args.rows) {
        println!("{line}");
    }
    session.shutdown();
    Ok(())
}

async fn write(
    engine: EngineConfig,
    gateway: Arc<dyn TileGateway>,
    hub: &LocalHub,
    args: WriteArgs,
) -> Result<(), CliError> {
    let color = match args.color.as_deref() {
        Some(hex) => Some(
            CellColor::parse_hex(hex)
                .ok_or_else(|| CliError::InvalidArgument(format!("bad color '{hex}'")))?,
        ),
        None => None,
    };
    let metrics = CellMetrics::from_config(&engine);
    let canvas = CanvasSize::cells(WRITE_CANVAS.0, WRITE_CANVAS.1, metrics);
    let mut session = ViewSession::new(engine, gateway, hub.connect(), canvas)?;
    let at = CellPos::new(args.x, args.y);
    session.teleport(TeleportRequest::to_cell(at.x, at.y)).await;
    session.start().await;

    if color.is_some() {
        session.submit(EditIntent::SetColor(color));
    }
    session.submit(EditIntent::Write {
        at,
        text: args.text.clone(),
    });
    session.settle().await;

    for key in touched_tiles(at, &args.text) {
        let version = session.snapshot(key).map(|tile| tile.version).unwrap_or(0);
        println!("{key} v{version}");
    }
    session.shutdown();
    Ok(())
}

/// Tiles a programmatic write of `text` at `at` lands on, in write order.
fn touched_tiles(at: CellPos, text: &str) -> Vec<TileKey> {
    let mut caret = Caret::at(at);
    let mut keys = Vec::new();
    for ch in text.chars() {
        match ch {
            '\n' => caret.newline(),
            ch if ch.is_control() => {}
            _ => {
                let key = caret.pos.to_address().tile;
                if !keys.contains(&key) {
                    keys.push(key);
                }
                caret.advance();
            }
        }
    }
    keys
}
