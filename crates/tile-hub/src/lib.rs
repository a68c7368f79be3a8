//! Realtime hub plumbing for tile update groups.
//!
//! A hub connection lets a client join and leave named groups (one group per
//! tile), invoke server methods and receive pushed events. Servers speak one of
//! two membership dialects, see [`Dialect`]. [`LocalHub`] is an in-process hub
//! used by tests and offline sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

pub const JOIN_TILE: &str = "JoinTile";
pub const LEAVE_TILE: &str = "LeaveTile";
pub const SUBSCRIBE_TILE: &str = "SubscribeTile";
pub const UNSUBSCRIBE_TILE: &str = "UnsubscribeTile";
pub const TYPING: &str = "Typing";

pub const EVENT_TILE_PATCHED: &str = "tilePatched";
pub const EVENT_PEER_TYPING: &str = "peerTyping";
/// Delivered to a connection after it comes back from a drop. Group
/// memberships do not survive a reconnect.
pub const EVENT_RECONNECTED: &str = "$reconnected";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMessage {
    pub group: String,
    pub event: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub connection is disconnected")]
    Disconnected,
    #[error("hub does not expose method {0}")]
    UnknownMethod(String),
    #[error("hub transport error: {0}")]
    Transport(String),
}

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Membership method names a hub server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    JoinLeave,
    SubscribeUnsubscribe,
}

impl Dialect {
    pub fn join_method(self) -> &'static str {
        match self {
            Dialect::JoinLeave => JOIN_TILE,
            Dialect::SubscribeUnsubscribe => SUBSCRIBE_TILE,
        }
    }

    pub fn leave_method(self) -> &'static str {
        match self {
            Dialect::JoinLeave => LEAVE_TILE,
            Dialect::SubscribeUnsubscribe => UNSUBSCRIBE_TILE,
        }
    }
}

pub trait HubConnection: Send + Sync {
    fn supports(&self, method: &str) -> bool;
    fn invoke(&self, method: &str, group: &str, payload: Bytes) -> HubResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<HubMessage>;
    fn state(&self) -> ConnectionState;
}

#[derive(Debug)]
struct Member {
    sender: broadcast::Sender<HubMessage>,
    groups: HashSet<String>,
    connected: bool,
}

#[derive(Debug)]
struct HubInner {
    dialect: Dialect,
    next_id: AtomicU64,
    members: RwLock<HashMap<u64, Member>>,
}

impl HubInner {
    fn publish(&self, group: &str, event: &str, payload: Bytes, except: Option<u64>) -> usize {
        let members = self.members.read();
        let mut delivered = 0;
        for (id, member) in members.iter() {
            if Some(*id) == except || !member.connected || !member.groups.contains(group) {
                continue;
            }
            let message = HubMessage {
                group: group.to_string(),
                event: event.to_string(),
                payload: payload.clone(),
            };
            if member.sender.send(message).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// In-process hub server.
#[derive(Debug, Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            inner: Arc::new(HubInner {
                dialect,
                next_id: AtomicU64::new(1),
                members: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn connect(&self) -> Arc<LocalConnection> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.inner.members.write().insert(
            id,
            Member {
                sender,
                groups: HashSet::new(),
                connected: true,
            },
        );
        Arc::new(LocalConnection {
            id,
            hub: Arc::clone(&self.inner),
        })
    }

    /// Push an event to every connected member of `group` except `except`.
    /// Returns how many connections received it.
    pub fn publish(&self, group: &str, event: &str, payload: Bytes, except: Option<u64>) -> usize {
        self.inner.publish(group, event, payload, except)
    }

    pub fn member_count(&self, group: &str) -> usize {
        self.inner
            .members
            .read()
            .values()
            .filter(|member| member.connected && member.groups.contains(group))
            .count()
    }
}

#[derive(Debug)]
pub struct LocalConnection {
    id: u64,
    hub: Arc<HubInner>,
}

impl LocalConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn groups(&self) -> HashSet<String> {
        self.hub
            .members
            .read()
            .get(&self.id)
            .map(|member| member.groups.clone())
            .unwrap_or_default()
    }

    /// Simulate a transport drop. Memberships are discarded.
    pub fn disconnect(&self) {
        if let Some(member) = self.hub.members.write().get_mut(&self.id) {
            member.connected = false;
            member.groups.clear();
        }
    }

    pub fn reconnect(&self) {
        let mut members = self.hub.members.write();
        if let Some(member) = members.get_mut(&self.id) {
            if member.connected {
                return;
            }
            member.connected = true;
            let _ = member.sender.send(HubMessage {
                group: String::new(),
                event: EVENT_RECONNECTED.to_string(),
                payload: Bytes::new(),
            });
        }
    }
}

impl HubConnection for LocalConnection {
    fn supports(&self, method: &str) -> bool {
        let dialect = self.hub.dialect;
        method == dialect.join_method() || method == dialect.leave_method() || method == TYPING
    }

    fn invoke(&self, method: &str, group: &str, payload: Bytes) -> HubResult<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(HubError::Disconnected);
        }
        if !self.supports(method) {
            return Err(HubError::UnknownMethod(method.to_string()));
        }
        let dialect = self.hub.dialect;
        if method == TYPING {
            self.hub
                .publish(group, EVENT_PEER_TYPING, payload, Some(self.id));
            return Ok(());
        }
        let mut members = self.hub.members.write();
        let member = members
            .get_mut(&self.id)
            .ok_or_else(|| HubError::Transport("connection closed".into()))?;
        if method == dialect.join_method() {
            member.groups.insert(group.to_string());
        } else {
            member.groups.remove(group);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        let members = self.hub.members.read();
        match members.get(&self.id) {
            Some(member) => member.sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    fn state(&self) -> ConnectionState {
        let connected = self
            .hub
            .members
            .read()
            .get(&self.id)
            .is_some_and(|member| member.connected);
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.hub.members.write().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joined_members_receive_group_events() {
        let hub = LocalHub::new(Dialect::JoinLeave);
        let conn = hub.connect();
        let mut rx = conn.subscribe();
        conn.invoke(JOIN_TILE, "0:0", Bytes::new()).expect("join ok");

        let delivered = hub.publish("0:0", EVENT_TILE_PATCHED, Bytes::from_static(b"{}"), None);
        assert_eq!(delivered, 1);
        let msg = rx.recv().await.expect("receive ok");
        assert_eq!(msg.group, "0:0");
        assert_eq!(msg.event, EVENT_TILE_PATCHED);

        conn.invoke(LEAVE_TILE, "0:0", Bytes::new()).expect("leave ok");
        assert_eq!(hub.member_count("0:0"), 0);
        assert_eq!(hub.publish("0:0", EVENT_TILE_PATCHED, Bytes::new(), None), 0);
    }

    #[test]
    fn dialect_limits_exposed_methods() {
        let hub = LocalHub::new(Dialect::SubscribeUnsubscribe);
        let conn = hub.connect();
        assert!(conn.supports(SUBSCRIBE_TILE));
        assert!(!conn.supports(JOIN_TILE));
        let err = conn.invoke(JOIN_TILE, "1:1", Bytes::new()).unwrap_err();
        assert!(matches!(err, HubError::UnknownMethod(_)));
    }

    #[tokio::test]
    async fn typing_is_relayed_to_peers_only() {
        let hub = LocalHub::new(Dialect::JoinLeave);
        let alice = hub.connect();
        let bob = hub.connect();
        alice.invoke(JOIN_TILE, "2:3", Bytes::new()).unwrap();
        bob.invoke(JOIN_TILE, "2:3", Bytes::new()).unwrap();
        let mut alice_rx = alice.subscribe();
        let mut bob_rx = bob.subscribe();

        alice
            .invoke(TYPING, "2:3", Bytes::from_static(b"hint"))
            .unwrap();
        let msg = bob_rx.recv().await.unwrap();
        assert_eq!(msg.event, EVENT_PEER_TYPING);
        assert_eq!(msg.payload, Bytes::from_static(b"hint"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_drops_memberships_and_notifies() {
        let hub = LocalHub::new(Dialect::JoinLeave);
        let conn = hub.connect();
        let mut rx = conn.subscribe();
        conn.invoke(JOIN_TILE, "0:0", Bytes::new()).unwrap();

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.invoke(TYPING, "0:0", Bytes::new()),
            Err(HubError::Disconnected)
        ));

        conn.reconnect();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.event, EVENT_RECONNECTED);
        assert!(conn.groups().is_empty());
    }
}
