use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::addressing::local_to_offset;
use crate::cache::{CellPos, TILE_COLS, TILE_ROWS, TileAddress, TileKey};

/// Last reported cursor of a remote peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerCursor {
    pub tile: TileKey,
    pub col: i64,
    pub row: i64,
    pub seen: Instant,
}

impl PeerCursor {
    /// Absolute cell, or `None` when the reported position is outside the
    /// tile or the tile itself is off the addressable grid.
    pub fn cell(&self) -> Option<CellPos> {
        if !(0..TILE_COLS).contains(&self.col) || !(0..TILE_ROWS).contains(&self.row) {
            return None;
        }
        CellPos::from_address(TileAddress {
            tile: self.tile,
            offset: local_to_offset(self.col, self.row),
        })
    }
}

/// Transient peer cursors, latest report wins per sender. Expired entries
/// are pruned lazily whenever the board is read.
#[derive(Debug)]
pub struct PresenceBoard {
    ttl: Duration,
    peers: HashMap<String, PeerCursor>,
}

impl PresenceBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: HashMap::new(),
        }
    }

    pub fn record(&mut self, sender: &str, tile: TileKey, col: i64, row: i64, now: Instant) {
        self.peers.insert(
            sender.to_string(),
            PeerCursor {
                tile,
                col,
                row,
                seen: now,
            },
        );
    }

    pub fn peers(&mut self, now: Instant) -> Vec<(String, PeerCursor)> {
        let ttl = self.ttl;
        self.peers
            .retain(|_, cursor| now.saturating_duration_since(cursor.seen) <= ttl);
        let mut peers: Vec<(String, PeerCursor)> = self
            .peers
            .iter()
            .map(|(sender, cursor)| (sender.clone(), *cursor))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }
}

/// Client-side rate limit for outbound typing hints.
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True (and arms the throttle) when a hint may be sent at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left before [`TypingThrottle::ready`] would pass at `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last
            .map(|last| self.interval.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_report_wins_and_expired_peers_are_pruned() {
        let start = Instant::now();
        let mut board = PresenceBoard::new(Duration::from_secs(3));
        board.record("ann", TileKey::ORIGIN, 1, 1, start);
        board.record("bob", TileKey::ORIGIN, 2, 2, start);
        board.record("ann", TileKey::new(1, 0), 3, 4, start + Duration::from_secs(2));

        let peers = board.peers(start + Duration::from_millis(3500));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].0, "ann");
        assert_eq!(peers[0].1.cell(), Some(CellPos::new(19, 4)));
    }

    #[test]
    fn invalid_local_position_has_no_cell() {
        let cursor = PeerCursor {
            tile: TileKey::ORIGIN,
            col: 16,
            row: 0,
            seen: Instant::now(),
        };
        assert_eq!(cursor.cell(), None);
    }

    #[test]
    fn peers_far_off_the_grid_have_no_cell() {
        let now = Instant::now();
        let mut board = PresenceBoard::new(Duration::from_secs(3));
        board.record("far", TileKey::new(i64::MAX, 0), 1, 1, now);
        board.record("low", TileKey::new(0, i64::MIN), 1, 1, now);
        let peers = board.peers(now);
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|(_, cursor)| cursor.cell().is_none()));
    }

    #[test]
    fn throttle_limits_hint_rate() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::new(Duration::from_millis(150));
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(100)));
        assert!(throttle.ready(start + Duration::from_millis(150)));
    }

    #[test]
    fn throttle_reports_time_until_next_slot() {
        let start = Instant::now();
        let mut throttle = TypingThrottle::new(Duration::from_millis(150));
        assert_eq!(throttle.remaining(start), Duration::ZERO);
        assert!(throttle.ready(start));
        assert_eq!(
            throttle.remaining(start + Duration::from_millis(100)),
            Duration::from_millis(50)
        );
        assert_eq!(throttle.remaining(start + Duration::from_millis(200)), Duration::ZERO);
    }
}
