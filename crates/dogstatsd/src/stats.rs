// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional process statistics: a per-second packet sampler and the
//! debug-mode per-metric counters.

use crate::errors::CreationError;
use prometheus::IntGauge;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counts packets and keeps a short per-second history, feeding the
/// `packets_last_second` gauge once a second.
pub struct PacketStats {
    current: AtomicU64,
    history: Mutex<VecDeque<u64>>,
    capacity: usize,
}

impl PacketStats {
    pub fn new(buffer: u32) -> Result<Self, CreationError> {
        if buffer == 0 {
            return Err(CreationError::ZeroCapacity);
        }
        Ok(PacketStats {
            current: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(buffer as usize)),
            capacity: buffer as usize,
        })
    }

    pub fn record(&self, packets: u64) {
        self.current.fetch_add(packets, Ordering::Relaxed);
    }

    /// Closes the current one-second window and returns its count.
    fn rollover(&self) -> u64 {
        let count = self.current.swap(0, Ordering::Relaxed);
        #[allow(clippy::expect_used)]
        let mut history = self.history.lock().expect("lock poisoned");
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(count);
        count
    }

    pub fn last_second(&self) -> u64 {
        #[allow(clippy::expect_used)]
        let history = self.history.lock().expect("lock poisoned");
        history.back().copied().unwrap_or(0)
    }

    pub fn history(&self) -> Vec<u64> {
        #[allow(clippy::expect_used)]
        let history = self.history.lock().expect("lock poisoned");
        history.iter().copied().collect()
    }

    /// Ticks once a second until cancelled, publishing each closed window
    /// to the gauge.
    pub async fn run(&self, gauge: IntGauge, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.tick().await; // the first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = self.rollover();
                    gauge.set(count as i64);
                }
                () = cancel.cancelled() => {
                    debug!("packet stats sampler stopping");
                    return;
                }
            }
        }
    }
}

/// How often a metric name was seen, and when last.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MetricStat {
    pub count: u64,
    /// Unix timestamp in seconds.
    pub last_seen: u64,
}

/// Debug-mode map of per-metric-name counters behind a single mutex.
#[derive(Default)]
pub struct MetricsStats {
    stats: Mutex<HashMap<String, MetricStat>>,
}

impl MetricsStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, name: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        #[allow(clippy::expect_used)]
        let mut stats = self.stats.lock().expect("lock poisoned");
        let entry = stats.entry(name.to_string()).or_default();
        entry.count += 1;
        entry.last_seen = now;
    }

    /// JSON snapshot of the stats map.
    pub fn json_stats(&self) -> Result<String, serde_json::Error> {
        #[allow(clippy::expect_used)]
        let stats = self.stats.lock().expect("lock poisoned");
        serde_json::to_string(&*stats)
    }

    /// Fixed-width table of the stats map, most frequent metric first.
    pub fn format_table(&self) -> String {
        #[allow(clippy::expect_used)]
        let stats = self.stats.lock().expect("lock poisoned");
        if stats.is_empty() {
            return "No metrics processed yet.".to_string();
        }

        let mut order: Vec<(&String, &MetricStat)> = stats.iter().collect();
        order.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));

        let header = format!("{:<40} | {:<10} | {:<20}\n", "Metric", "Count", "Last Seen");
        let mut out = String::with_capacity(header.len() * (order.len() + 2));
        out.push_str(&header);
        // The separator is sized on the header's byte length, newline
        // included.
        out.push_str(&"-".repeat(header.len()));
        out.push('\n');
        for (name, stat) in order {
            out.push_str(&format!(
                "{:<40} | {:<10} | {:<20}\n",
                name, stat.count, stat.last_seen
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_stats_rollover() {
        let stats = PacketStats::new(3).expect("stats creation failed");
        stats.record(5);
        stats.record(2);
        assert_eq!(stats.rollover(), 7);
        assert_eq!(stats.last_second(), 7);
        assert_eq!(stats.rollover(), 0);
        assert_eq!(stats.history(), vec![7, 0]);
    }

    #[test]
    fn test_packet_stats_history_bounded() {
        let stats = PacketStats::new(2).expect("stats creation failed");
        for n in 1..=4u64 {
            stats.record(n);
            stats.rollover();
        }
        assert_eq!(stats.history(), vec![3, 4]);
    }

    #[test]
    fn test_packet_stats_rejects_zero_buffer() {
        assert!(PacketStats::new(0).is_err());
    }

    #[test]
    fn test_metrics_stats_counts() {
        let stats = MetricsStats::new();
        stats.store("a");
        stats.store("a");
        stats.store("b");

        let json = stats.json_stats().expect("json failed");
        let parsed: HashMap<String, MetricStat> =
            serde_json::from_str(&json).expect("roundtrip failed");
        assert_eq!(parsed["a"].count, 2);
        assert_eq!(parsed["b"].count, 1);
        assert!(parsed["a"].last_seen > 0);
    }

    #[test]
    fn test_format_table_sorted_by_count() {
        let stats = MetricsStats::new();
        stats.store("rare");
        stats.store("frequent");
        stats.store("frequent");

        let table = stats.format_table();
        let frequent_at = table.find("frequent").expect("missing row");
        let rare_at = table.find("rare").expect("missing row");
        assert!(frequent_at < rare_at);
        assert!(table.starts_with("Metric"));
    }

    #[test]
    fn test_format_table_empty() {
        let stats = MetricsStats::new();
        assert_eq!(stats.format_table(), "No metrics processed yet.");
    }
}
