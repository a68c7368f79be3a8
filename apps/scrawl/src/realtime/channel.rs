use std::sync::Arc;

use bytes::Bytes;
use tile_hub::{
    ConnectionState, Dialect, HubConnection, HubError, HubMessage, HubResult, JOIN_TILE,
    LEAVE_TILE, SUBSCRIBE_TILE, TYPING, UNSUBSCRIBE_TILE,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::cache::TileKey;
use crate::gateway::PeerTyping;

/// Tile-group view of a hub connection. The membership dialect is resolved
/// once here; every later join/leave uses the negotiated method names.
pub struct TileChannel {
    conn: Arc<dyn HubConnection>,
    dialect: Dialect,
    sender_id: String,
}

impl TileChannel {
    pub fn negotiate(conn: Arc<dyn HubConnection>, sender_id: impl Into<String>) -> HubResult<Self> {
        let dialect = if conn.supports(JOIN_TILE) && conn.supports(LEAVE_TILE) {
            Dialect::JoinLeave
        } else if conn.supports(SUBSCRIBE_TILE) && conn.supports(UNSUBSCRIBE_TILE) {
            Dialect::SubscribeUnsubscribe
        } else {
            return Err(HubError::UnknownMethod("tile membership".into()));
        };
        debug!(target = "scrawl::realtime", ?dialect, "hub membership dialect negotiated");
        Ok(Self {
            conn,
            dialect,
            sender_id: sender_id.into(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn is_connected(&self) -> bool {
        self.conn.state() == ConnectionState::Connected
    }

    pub fn join(&self, key: TileKey) -> HubResult<()> {
        self.conn
            .invoke(self.dialect.join_method(), &key.to_string(), Bytes::new())
    }

    pub fn leave(&self, key: TileKey) -> HubResult<()> {
        self.conn
            .invoke(self.dialect.leave_method(), &key.to_string(), Bytes::new())
    }

    /// Publish a typing hint. A no-op returning false while disconnected or
    /// when the hint cannot be delivered.
    pub fn send_typing(&self, key: TileKey, col: i64, row: i64) -> bool {
        if !self.is_connected() {
            trace!(target = "scrawl::realtime", "dropping typing hint while disconnected");
            return false;
        }
        let hint = PeerTyping {
            x: key.x,
            y: key.y,
            col,
            row,
            sender: self.sender_id.clone(),
        };
        let payload = match serde_json::to_vec(&hint) {
            Ok(payload) => Bytes::from(payload),
            Err(_) => return false,
        };
        match self.conn.invoke(TYPING, &key.to_string(), payload) {
            Ok(()) => true,
            Err(err) => {
                trace!(target = "scrawl::realtime", error = %err, "typing hint not delivered");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.conn.subscribe()
    }
}
