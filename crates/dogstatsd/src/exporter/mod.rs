// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bridge between the streaming sample model and the pull-based
//! Prometheus model.
//!
//! Every distinct fingerprint owns at most one registered collector.
//! Lookups go through a sharded map; create-and-register happens under
//! the fingerprint's shard lock, so when two workers race on a cold miss
//! the loser blocks briefly and then adopts the winner's collector.
//! Entries idle past the configured TTL are evicted by a background
//! sweep, which deregisters the collector from the registry.

mod sample;

pub use sample::{CollectorKind, PromSample};

use crate::constants::{DEFAULT_EXPORTER_IDLE_TTL, DEFAULT_EXPORTER_SWEEP_INTERVAL};
use crate::metric::MetricSample;
use crate::service_check::ServiceCheck;
use crate::telemetry::Telemetry;
use prometheus::core::Collector;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EXPORTER_SHARDS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("collector registration conflict for {0}")]
    RegistrationConflict(String),

    #[error("negative counter increment {value} for {key}")]
    NegativeCounter { key: String, value: f64 },

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Clone)]
enum CollectorHandle {
    Gauge(GaugeVec),
    Counter(CounterVec),
    Histogram(HistogramVec),
}

impl CollectorHandle {
    fn boxed(&self) -> Box<dyn Collector> {
        match self {
            CollectorHandle::Gauge(vec) => Box::new(vec.clone()),
            CollectorHandle::Counter(vec) => Box::new(vec.clone()),
            CollectorHandle::Histogram(vec) => Box::new(vec.clone()),
        }
    }
}

struct ExporterEntry {
    collector: CollectorHandle,
    last_access: Instant,
}

#[derive(Clone, Copy, Debug)]
pub struct PromExporterConfig {
    /// Idle lifetime before a collector is deregistered.
    pub idle_ttl: Duration,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
}

impl Default for PromExporterConfig {
    fn default() -> Self {
        PromExporterConfig {
            idle_ttl: DEFAULT_EXPORTER_IDLE_TTL,
            sweep_interval: DEFAULT_EXPORTER_SWEEP_INTERVAL,
        }
    }
}

pub struct PromExporter {
    registry: Registry,
    shards: Vec<Mutex<HashMap<String, ExporterEntry>>>,
    buckets: Vec<f64>,
    idle_ttl: Duration,
    sweep_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl PromExporter {
    pub fn new(
        registry: Registry,
        telemetry: Arc<Telemetry>,
        config: PromExporterConfig,
    ) -> Result<Self, prometheus::Error> {
        // Millisecond-domain buckets shared by every histogram collector.
        let buckets = prometheus::exponential_buckets(0.1, 1.6, 32)?;
        let shards = (0..EXPORTER_SHARDS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Ok(PromExporter {
            registry,
            shards,
            buckets,
            idle_ttl: config.idle_ttl,
            sweep_interval: config.sweep_interval,
            telemetry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Applies one enriched metric sample to its collector, creating and
    /// registering the collector on a cold miss.
    pub fn export_sample(&self, sample: &MetricSample) -> Result<(), ExportError> {
        self.observe(PromSample::from_metric(sample))
    }

    /// Applies one enriched service check to its `_sc_` counter.
    pub fn export_service_check(&self, check: &ServiceCheck) -> Result<(), ExportError> {
        self.observe(PromSample::from_service_check(check))
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, ExporterEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % EXPORTER_SHARDS]
    }

    fn observe(&self, ps: PromSample) -> Result<(), ExportError> {
        let collector = {
            #[allow(clippy::expect_used)]
            let mut map = self.shard(&ps.key).lock().expect("lock poisoned");
            match map.get_mut(&ps.key) {
                Some(entry) => {
                    entry.last_access = Instant::now();
                    entry.collector.clone()
                }
                None => {
                    let collector = self.create_collector(&ps)?;
                    match self.registry.register(collector.boxed()) {
                        Ok(()) => {}
                        Err(prometheus::Error::AlreadyReg) => {
                            // A collector with the same descriptor but a
                            // different fingerprint (e.g. another kind
                            // under the same name) already owns the
                            // series; the registry gives us no handle to
                            // adopt, so the observation is dropped.
                            self.telemetry.exporter_conflicts.inc();
                            return Err(ExportError::RegistrationConflict(ps.key));
                        }
                        Err(err) => return Err(ExportError::Prometheus(err)),
                    }
                    debug!("registered collector for {}", ps.key);
                    let entry = ExporterEntry {
                        collector: collector.clone(),
                        last_access: Instant::now(),
                    };
                    map.insert(ps.key.clone(), entry);
                    collector
                }
            }
        };

        self.apply(&collector, &ps)
    }

    fn create_collector(&self, ps: &PromSample) -> Result<CollectorHandle, ExportError> {
        let labels: Vec<&str> = ps.label_names.iter().map(String::as_str).collect();
        let handle = match ps.kind {
            CollectorKind::Gauge => CollectorHandle::Gauge(GaugeVec::new(
                Opts::new(ps.name.clone(), ps.name.clone()),
                &labels,
            )?),
            CollectorKind::Counter => CollectorHandle::Counter(CounterVec::new(
                Opts::new(ps.name.clone(), ps.name.clone()),
                &labels,
            )?),
            CollectorKind::Histogram => CollectorHandle::Histogram(HistogramVec::new(
                HistogramOpts::new(ps.name.clone(), ps.name.clone())
                    .buckets(self.buckets.clone()),
                &labels,
            )?),
        };
        Ok(handle)
    }

    fn apply(&self, collector: &CollectorHandle, ps: &PromSample) -> Result<(), ExportError> {
        let values: Vec<&str> = ps.label_values.iter().map(String::as_str).collect();
        match collector {
            CollectorHandle::Gauge(vec) => {
                vec.get_metric_with_label_values(&values)?.set(ps.value);
            }
            CollectorHandle::Counter(vec) => {
                if ps.value < 0.0 {
                    return Err(ExportError::NegativeCounter {
                        key: ps.key.clone(),
                        value: ps.value,
                    });
                }
                vec.get_metric_with_label_values(&values)?.inc_by(ps.value);
            }
            CollectorHandle::Histogram(vec) => {
                vec.get_metric_with_label_values(&values)?.observe(ps.value);
            }
        }
        Ok(())
    }

    /// Evicts every entry idle past the TTL, deregistering its collector.
    /// Returns the number of evicted entries.
    pub fn sweep_idle(&self) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            #[allow(clippy::expect_used)]
            let mut map = shard.lock().expect("lock poisoned");
            let expired: Vec<String> = map
                .iter()
                .filter(|(_, entry)| entry.last_access.elapsed() >= self.idle_ttl)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if let Some(entry) = map.remove(&key) {
                    match self.registry.unregister(entry.collector.boxed()) {
                        Ok(()) => {
                            self.telemetry.exporter_evictions.inc();
                            debug!("deregistered idle collector {}", key);
                        }
                        Err(err) => warn!("failed to deregister collector {}: {}", key, err),
                    }
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Runs the idle sweep until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.sweep_interval);
        ticker.tick().await; // the first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep_idle();
                    if evicted > 0 {
                        debug!("exporter sweep evicted {} collectors", evicted);
                    }
                }
                () = cancel.cancelled() => {
                    debug!("exporter sweeper stopping");
                    return;
                }
            }
        }
    }

    /// Deregisters every live collector. Called once on shutdown.
    pub fn shutdown(&self) {
        for shard in &self.shards {
            #[allow(clippy::expect_used)]
            let mut map = shard.lock().expect("lock poisoned");
            for (key, entry) in map.drain() {
                if let Err(err) = self.registry.unregister(entry.collector.boxed()) {
                    warn!("failed to deregister collector {} on shutdown: {}", key, err);
                }
            }
        }
    }

    /// Number of live cache entries, across all shards.
    pub fn live_series(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                #[allow(clippy::expect_used)]
                let map = shard.lock().expect("lock poisoned");
                map.len()
            })
            .sum()
    }
}
