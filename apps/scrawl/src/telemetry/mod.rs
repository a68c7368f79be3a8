//! Opt-in performance counters (`SCRAWL_PERF=1`) and log setup.
//!
//! Counters are cheap no-ops when disabled. When enabled, each label is
//! summarized to the `scrawl::perf` target every [`REPORT_EVERY`] samples.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub mod logging;

pub const REPORT_EVERY: u64 = 100;

static ENABLED: Lazy<AtomicBool> = Lazy::new(|| {
    let on = std::env::var("SCRAWL_PERF").is_ok_and(|v| !v.is_empty() && v != "0");
    AtomicBool::new(on)
});

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

#[derive(Default)]
struct Registry {
    timings: HashMap<&'static str, Timing>,
    gauges: HashMap<&'static str, Gauge>,
}

#[derive(Default, Clone, Copy)]
struct Timing {
    count: u64,
    total: Duration,
    max: Duration,
}

#[derive(Default, Clone, Copy)]
struct Gauge {
    last: u64,
    peak: u64,
    samples: u64,
}

/// Point-in-time view of one timing label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSummary {
    pub label: &'static str,
    pub count: u64,
    pub mean: Duration,
    pub max: Duration,
}

pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Overrides the environment switch, mostly for tests and the CLI.
pub fn set_enabled(on: bool) {
    ENABLED.store(on, Ordering::Relaxed);
}

pub fn record_duration(label: &'static str, elapsed: Duration) {
    if !enabled() {
        return;
    }
    let mut registry = REGISTRY.lock();
    let timing = registry.timings.entry(label).or_default();
    timing.count += 1;
    timing.total += elapsed;
    timing.max = timing.max.max(elapsed);
    if timing.count % REPORT_EVERY == 0 {
        let mean = timing.total / timing.count as u32;
        tracing::info!(
            target = "scrawl::perf",
            label,
            count = timing.count,
            mean_us = mean.as_micros() as u64,
            max_us = timing.max.as_micros() as u64,
            "timing"
        );
    }
}

pub fn record_gauge(label: &'static str, value: u64) {
    if !enabled() {
        return;
    }
    let mut registry = REGISTRY.lock();
    let gauge = registry.gauges.entry(label).or_default();
    gauge.last = value;
    gauge.peak = gauge.peak.max(value);
    gauge.samples = gauge.samples.saturating_add(1);
    if gauge.samples % REPORT_EVERY == 0 {
        tracing::info!(
            target = "scrawl::perf",
            label,
            last = gauge.last,
            peak = gauge.peak,
            "gauge"
        );
    }
}

pub fn timing(label: &str) -> Option<TimingSummary> {
    let registry = REGISTRY.lock();
    registry
        .timings
        .get_key_value(label)
        .map(|(label, timing)| TimingSummary {
            label,
            count: timing.count,
            mean: timing.total / timing.count.max(1) as u32,
            max: timing.max,
        })
}

/// Last and peak value recorded for a gauge.
pub fn gauge(label: &str) -> Option<(u64, u64)> {
    REGISTRY
        .lock()
        .gauges
        .get(label)
        .map(|gauge| (gauge.last, gauge.peak))
}

/// Times a scope under `label`; `None` while counters are off.
pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        enabled().then(|| Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.start.elapsed());
    }
}
