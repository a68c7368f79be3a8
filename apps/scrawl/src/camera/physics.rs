//! Drag sampling and release inertia.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::Vec2;
use crate::config::PhysicsConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Release {
    Stop,
    /// Pointer velocity in pixels per second, already damped.
    Fling(Vec2),
}

/// Rolling window of pointer samples, bounded by count and by age.
#[derive(Debug)]
pub struct DragTracker {
    samples: VecDeque<(Vec2, Instant)>,
    limit: usize,
    window: Duration,
    quiet_window: Duration,
    quiet_distance: f64,
    damping: f64,
}

impl DragTracker {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.sample_limit),
            limit: config.sample_limit.max(2),
            window: Duration::from_millis(config.sample_window_ms),
            quiet_window: Duration::from_millis(config.quiet_window_ms),
            quiet_distance: config.quiet_distance_px,
            damping: config.release_damping,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<Vec2> {
        self.samples.back().map(|(pos, _)| *pos)
    }

    pub fn push(&mut self, pos: Vec2, at: Instant) {
        self.samples.push_back((pos, at));
        while self.samples.len() > self.limit {
            self.samples.pop_front();
        }
        self.prune(at);
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        while self
            .samples
            .front()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) > window)
        {
            self.samples.pop_front();
        }
    }

    /// Decide what happens when the pointer lifts at `now`. A pointer that
    /// barely moved during the quiet window stops dead; otherwise the average
    /// velocity across the whole window is scaled by the release damping.
    pub fn release(&mut self, now: Instant) -> Release {
        self.prune(now);
        if self.samples.len() < 2 {
            return Release::Stop;
        }

        let quiet = self.quiet_window;
        let recent_path: f64 = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) <= quiet)
            .map(|((a, _), (b, _))| (*b - *a).length())
            .sum();
        if recent_path < self.quiet_distance {
            return Release::Stop;
        }

        let (Some((first, start)), Some((last, end))) = (self.samples.front(), self.samples.back())
        else {
            return Release::Stop;
        };
        let elapsed = end.saturating_duration_since(*start).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return Release::Stop;
        }
        Release::Fling((*last - *first) * (self.damping / elapsed))
    }
}

/// Decaying post-release motion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fling {
    velocity: Vec2,
    decay: f64,
    min_speed_sq: f64,
}

impl Fling {
    pub fn new(velocity: Vec2, config: &PhysicsConfig) -> Self {
        Self {
            velocity,
            decay: config.decay_per_sec,
            min_speed_sq: config.min_speed_sq,
        }
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn is_done(&self) -> bool {
        self.velocity.length_sq() < self.min_speed_sq
    }

    /// Advance by `dt`, returning the displacement for this step or `None`
    /// once the fling has come to rest.
    pub fn step(&mut self, dt: Duration) -> Option<Vec2> {
        if self.is_done() {
            return None;
        }
        let secs = dt.as_secs_f64();
        let delta = self.velocity * secs;
        self.velocity = self.velocity * (-self.decay * secs).exp();
        Some(delta)
    }
}
