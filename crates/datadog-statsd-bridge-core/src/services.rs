// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Composition root for the bridge pipeline.
//!
//! Builds the registry, telemetry, exporter, mapper and the DogStatsD
//! server, wires the typed output channels into the exporter, and hands
//! back a handle that can stop everything through one cancellation
//! token. The exporter deregisters all live collectors once the last
//! output channel drains.

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::hostname::get_hostname;
use dogstatsd::batcher::ServerOutputs;
use dogstatsd::constants::DEFAULT_EXPORTER_SWEEP_INTERVAL;
use dogstatsd::enrich::{NoopTagResolver, TagResolver};
use dogstatsd::exporter::{PromExporter, PromExporterConfig};
use dogstatsd::mapper::MetricMapper;
use dogstatsd::server::{self, DogStatsDConfig, ServerDeps};
use dogstatsd::stats::{MetricsStats, PacketStats};
use dogstatsd::telemetry::Telemetry;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to the running bridge services.
#[derive(Clone)]
pub struct BridgeHandle {
    listen_addr: SocketAddr,
    registry: Registry,
    exporter: Arc<PromExporter>,
    metrics_stats: Option<Arc<MetricsStats>>,
    cancel: CancellationToken,
}

impl BridgeHandle {
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Registry backing the scrape endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics_stats(&self) -> Option<&Arc<MetricsStats>> {
        self.metrics_stats.as_ref()
    }

    pub fn live_series(&self) -> usize {
        self.exporter.live_series()
    }

    /// Signals every pipeline task to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the services have been told to stop.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }
}

/// Bridge service coordinator.
pub struct BridgeServices {
    config: BridgeConfig,
    resolver: Arc<dyn TagResolver>,
}

impl BridgeServices {
    pub fn new(config: BridgeConfig) -> Self {
        BridgeServices {
            config,
            resolver: Arc::new(NoopTagResolver),
        }
    }

    /// Replaces the no-op tag resolver with a real workload metadata
    /// source.
    pub fn with_resolver(mut self, resolver: Arc<dyn TagResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Starts the whole pipeline. Configuration and bind failures are
    /// fatal; everything on the data path is recoverable.
    pub async fn start(self) -> Result<BridgeHandle, BridgeError> {
        let config = self.config;
        config.validate()?;

        let registry = Registry::new();
        let telemetry = Arc::new(Telemetry::new(&registry)?);
        let exporter = Arc::new(PromExporter::new(
            registry.clone(),
            Arc::clone(&telemetry),
            PromExporterConfig {
                idle_ttl: config.exporter_idle_ttl(),
                sweep_interval: DEFAULT_EXPORTER_SWEEP_INTERVAL,
            },
        )?);

        let mapper = if config.mapper_profiles.is_empty() {
            None
        } else {
            let mapper = MetricMapper::new(
                config.mapper_profiles.clone(),
                config.mapper_cache_size,
            )?;
            info!(
                "metric mapper enabled with {} profiles",
                config.mapper_profiles.len()
            );
            Some(Arc::new(mapper))
        };

        let metrics_stats = if config.metrics_stats_enable {
            info!("metrics statistics will be stored");
            Some(Arc::new(MetricsStats::new()))
        } else {
            None
        };

        let packet_stats = if config.agent_stats_enable {
            Some(Arc::new(PacketStats::new(config.agent_stats_buffer)?))
        } else {
            None
        };

        let default_hostname = get_hostname();
        debug!("default hostname resolved to {}", default_hostname);

        let cancel = CancellationToken::new();

        let (samples_tx, mut samples_rx) = mpsc::channel(config.queue_size);
        let (events_tx, mut events_rx) = mpsc::channel(config.queue_size);
        let (checks_tx, mut checks_rx) = mpsc::channel(config.queue_size);

        let server_config = DogStatsDConfig {
            host: config.host.clone(),
            port: config.port,
            non_local_traffic: config.non_local_traffic,
            so_rcvbuf: config.so_rcvbuf,
            buffer_size: config.buffer_size,
            pool_size: config.pool_size,
            batch_count: config.batch_count,
            batch_bytes: config.effective_batch_bytes(),
            flush_timeout: config.flush_timeout(),
            queue_size: config.queue_size,
            metric_namespace: config.metric_namespace.clone().unwrap_or_default(),
            metric_namespace_blacklist: config.metric_namespace_blacklist.clone(),
            default_hostname,
            extra_tags: config.agent_tags.clone(),
            histogram_copy_to_distribution: config.histogram_copy_to_distribution,
            histogram_copy_to_distribution_prefix: config
                .histogram_copy_to_distribution_prefix
                .clone(),
            forward_host: config.forward_host.clone(),
            forward_port: config.forward_port,
        };

        let server_handle = server::start(
            server_config,
            ServerOutputs {
                samples: samples_tx,
                events: events_tx,
                service_checks: checks_tx,
            },
            ServerDeps {
                telemetry: Arc::clone(&telemetry),
                resolver: Arc::clone(&self.resolver),
                mapper,
                metrics_stats: metrics_stats.clone(),
                packet_stats: packet_stats.clone(),
            },
            cancel.clone(),
        )
        .await?;
        info!(
            "dogstatsd-udp: starting to listen on {}",
            server_handle.listen_addr
        );

        // Pump the typed outputs into the exporter cache.
        let sample_exporter = Arc::clone(&exporter);
        let samples_task = tokio::spawn(async move {
            while let Some(batch) = samples_rx.recv().await {
                for sample in &batch {
                    if let Err(err) = sample_exporter.export_sample(sample) {
                        warn!("failed to export sample {}: {}", sample.name, err);
                    }
                }
            }
        });

        let check_exporter = Arc::clone(&exporter);
        let checks_task = tokio::spawn(async move {
            while let Some(batch) = checks_rx.recv().await {
                for check in &batch {
                    if let Err(err) = check_exporter.export_service_check(check) {
                        warn!("failed to export service check {}: {}", check.name, err);
                    }
                }
            }
        });

        // Events have no pull-side projection; they are logged and
        // dropped here until an event sink is wired in.
        let events_task = tokio::spawn(async move {
            while let Some(batch) = events_rx.recv().await {
                for event in &batch {
                    debug!(
                        "event received: {} (alert_type {:?})",
                        event.title, event.alert_type
                    );
                }
            }
        });

        tokio::spawn(Arc::clone(&exporter).run_sweeper(cancel.clone()));

        if let Some(stats) = &packet_stats {
            let stats = Arc::clone(stats);
            let gauge = telemetry.packets_last_second.clone();
            let stats_cancel = cancel.clone();
            tokio::spawn(async move {
                stats.run(gauge, stats_cancel).await;
            });
        }

        // Once every output drains the pipeline is fully stopped; tear
        // down the scrape surface so no stale series outlive it.
        let shutdown_exporter = Arc::clone(&exporter);
        tokio::spawn(async move {
            let _ = tokio::join!(samples_task, checks_task, events_task);
            shutdown_exporter.shutdown();
            debug!("pipeline outputs drained, exporter shut down");
        });

        Ok(BridgeHandle {
            listen_addr: server_handle.listen_addr,
            registry,
            exporter,
            metrics_stats,
            cancel,
        })
    }
}
