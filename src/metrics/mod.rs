//! Prometheus metrics
//!
//! Atomic counters and gauges rendered in the Prometheus text exposition
//! format. One [`Metrics`] instance is built at startup and shared by the
//! vote path, the broadcast hub and the WebSocket handler.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Integer gauge that can go up and down
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counter family keyed by a single label value
#[derive(Debug)]
pub struct LabeledCounter {
    label: &'static str,
    values: RwLock<BTreeMap<String, u64>>,
}

impl LabeledCounter {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, value: &str) {
        self.inc_by(value, 1);
    }

    pub fn inc_by(&self, value: &str, n: u64) {
        if n == 0 {
            return;
        }
        let mut values = self.values.write();
        match values.get_mut(value) {
            Some(count) => *count += n,
            None => {
                values.insert(value.to_string(), n);
            }
        }
    }

    pub fn get(&self, value: &str) -> u64 {
        self.values.read().get(value).copied().unwrap_or(0)
    }

    fn render(&self, out: &mut String, name: &str) {
        for (value, count) in self.values.read().iter() {
            let _ = writeln!(
                out,
                "{}{{{}=\"{}\"}} {}",
                name,
                self.label,
                escape_label_value(value),
                count
            );
        }
    }
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

/// Service metrics
#[derive(Debug)]
pub struct Metrics {
    /// Vote attempts by outcome: accepted, duplicate, not_found, error
    pub votes_total: LabeledCounter,
    /// Currently open observer connections
    pub ws_connections: Gauge,
    /// Broadcast frames by result: delivered, lagging, closed
    pub broadcast_frames_total: LabeledCounter,
    /// Completed `publish` calls
    pub broadcasts_total: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            votes_total: LabeledCounter::new("outcome"),
            ws_connections: Gauge::default(),
            broadcast_frames_total: LabeledCounter::new("result"),
            broadcasts_total: Counter::default(),
        }
    }

    /// Render in Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);

        write_header(&mut out, "pollcast_votes_total", "Vote attempts by outcome", "counter");
        self.votes_total.render(&mut out, "pollcast_votes_total");

        write_header(
            &mut out,
            "pollcast_ws_connections",
            "Open observer connections",
            "gauge",
        );
        let _ = writeln!(out, "pollcast_ws_connections {}", self.ws_connections.get());

        write_header(
            &mut out,
            "pollcast_broadcasts_total",
            "Tally updates published",
            "counter",
        );
        let _ = writeln!(out, "pollcast_broadcasts_total {}", self.broadcasts_total.get());

        write_header(
            &mut out,
            "pollcast_broadcast_frames_total",
            "Per-connection broadcast frames by result",
            "counter",
        );
        self.broadcast_frames_total
            .render(&mut out, "pollcast_broadcast_frames_total");

        out
    }
}
