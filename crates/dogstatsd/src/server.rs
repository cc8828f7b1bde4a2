// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The DogStatsD intake server.
//!
//! Wires the UDP listener, packet batcher, optional forwarder and the
//! worker pool together. Shutdown is driven by a single cancellation
//! token: the listener stops reading and drops its channel end, which
//! cascades stage by stage until each worker drains its input and exits.

use crate::batcher::{Batcher, ServerOutputs};
use crate::constants::{
    DEFAULT_BATCH_COUNT, DEFAULT_FLUSH_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_SIZE,
    MAX_DATAGRAM_SIZE,
};
use crate::enrich::{
    enrich_event, enrich_metric_sample, enrich_service_check, origin_tags, EnrichOptions,
    TagResolver,
};
use crate::forwarder::Forwarder;
use crate::mapper::MetricMapper;
use crate::message::{find_message_type, next_message, MessageType};
use crate::metric::{parse_metric_sample, MetricType};
use crate::packet::{Packet, PacketBatch, PacketBatcher, PacketPool};
use crate::stats::{MetricsStats, PacketStats};
use crate::telemetry::{
    Telemetry, MESSAGE_TYPE_EVENTS, MESSAGE_TYPE_METRICS, MESSAGE_TYPE_SERVICE_CHECKS,
    STATE_ERROR, STATE_OK,
};
use crate::udp::{UdpListener, UdpListenerConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ustr::Ustr;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("can't listen: {0}")]
    Bind(#[source] io::Error),
}

pub struct DogStatsDConfig {
    pub host: String,
    pub port: u16,
    pub non_local_traffic: bool,
    pub so_rcvbuf: Option<usize>,
    pub buffer_size: usize,
    pub pool_size: usize,
    pub batch_count: usize,
    pub batch_bytes: usize,
    pub flush_timeout: Duration,
    pub queue_size: usize,
    pub metric_namespace: String,
    pub metric_namespace_blacklist: Vec<String>,
    pub default_hostname: String,
    pub extra_tags: Vec<String>,
    pub histogram_copy_to_distribution: bool,
    pub histogram_copy_to_distribution_prefix: String,
    pub forward_host: String,
    pub forward_port: u16,
}

impl Default for DogStatsDConfig {
    fn default() -> Self {
        DogStatsDConfig {
            host: "127.0.0.1".to_string(),
            port: 8125,
            non_local_traffic: false,
            so_rcvbuf: None,
            buffer_size: MAX_DATAGRAM_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            batch_count: DEFAULT_BATCH_COUNT,
            batch_bytes: DEFAULT_BATCH_COUNT * MAX_DATAGRAM_SIZE,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
            metric_namespace: String::new(),
            metric_namespace_blacklist: Vec::new(),
            default_hostname: String::new(),
            extra_tags: Vec::new(),
            histogram_copy_to_distribution: false,
            histogram_copy_to_distribution_prefix: String::new(),
            forward_host: String::new(),
            forward_port: 0,
        }
    }
}

/// Shared collaborators injected into the server.
pub struct ServerDeps {
    pub telemetry: Arc<Telemetry>,
    pub resolver: Arc<dyn TagResolver>,
    pub mapper: Option<Arc<MetricMapper>>,
    pub metrics_stats: Option<Arc<MetricsStats>>,
    pub packet_stats: Option<Arc<PacketStats>>,
}

/// Handle to a started server.
pub struct DogStatsDHandle {
    pub listen_addr: SocketAddr,
}

/// Binds the socket and spawns every pipeline task. Only a bind failure
/// is fatal; a dead forward peer downgrades to a warning and the server
/// runs without mirroring.
pub async fn start(
    config: DogStatsDConfig,
    outputs: ServerOutputs,
    deps: ServerDeps,
    cancel: CancellationToken,
) -> Result<DogStatsDHandle, ServerError> {
    let pool = PacketPool::new(config.pool_size, config.buffer_size);

    let (packet_tx, packet_rx) = mpsc::channel::<Packet>(config.queue_size);
    let listener_config = UdpListenerConfig {
        host: config.host.clone(),
        port: config.port,
        non_local_traffic: config.non_local_traffic,
        so_rcvbuf: config.so_rcvbuf,
    };
    let listener = UdpListener::new(
        &listener_config,
        pool.clone(),
        packet_tx,
        Arc::clone(&deps.telemetry),
        cancel.clone(),
    )
    .await
    .map_err(ServerError::Bind)?;
    let listen_addr = listener.local_addr().map_err(ServerError::Bind)?;

    let (batch_tx, batch_rx) = mpsc::channel::<PacketBatch>(config.queue_size);
    let batcher = PacketBatcher::new(
        packet_rx,
        batch_tx,
        config.batch_count,
        config.batch_bytes,
        config.flush_timeout,
    );

    let mut worker_rx = batch_rx;
    if !config.forward_host.is_empty() && config.forward_port != 0 {
        match Forwarder::connect(
            &config.forward_host,
            config.forward_port,
            Arc::clone(&deps.telemetry),
        )
        .await
        {
            Ok(forwarder) => {
                let (forward_tx, forward_rx) = mpsc::channel(config.queue_size);
                tokio::spawn(forwarder.run(worker_rx, forward_tx));
                worker_rx = forward_rx;
            }
            Err(err) => {
                warn!(
                    "could not connect to statsd forward host {}:{}: {}",
                    config.forward_host, config.forward_port, err
                );
            }
        }
    }

    tokio::spawn(listener.listen());
    tokio::spawn(batcher.run());

    // One core is assumed busy with the listener and another with the
    // batcher and forwarder.
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let worker_count = parallelism.saturating_sub(2).max(2);

    let metric_prefix = normalized_prefix(&config.metric_namespace);
    let enrich = Arc::new(EnrichOptions {
        metric_prefix,
        metric_prefix_blacklist: config.metric_namespace_blacklist.clone(),
        default_hostname: config.default_hostname.clone(),
        entity_cardinality: Default::default(),
    });
    let extra_tags = Arc::new(config.extra_tags.clone());
    let shared_rx = Arc::new(Mutex::new(worker_rx));

    for id in 0..worker_count {
        let worker = Worker {
            id,
            input: Arc::clone(&shared_rx),
            pool: pool.clone(),
            batcher: Batcher::new(outputs.clone()),
            enrich: Arc::clone(&enrich),
            extra_tags: Arc::clone(&extra_tags),
            resolver: Arc::clone(&deps.resolver),
            mapper: deps.mapper.clone(),
            telemetry: Arc::clone(&deps.telemetry),
            metrics_stats: deps.metrics_stats.clone(),
            packet_stats: deps.packet_stats.clone(),
            hist_to_dist: config.histogram_copy_to_distribution,
            hist_to_dist_prefix: config.histogram_copy_to_distribution_prefix.clone(),
        };
        tokio::spawn(worker.run());
    }

    Ok(DogStatsDHandle { listen_addr })
}

fn normalized_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace.ends_with('.') {
        namespace.to_string()
    } else {
        format!("{namespace}.")
    }
}

struct Worker {
    id: usize,
    input: Arc<Mutex<mpsc::Receiver<PacketBatch>>>,
    pool: PacketPool,
    batcher: Batcher,
    enrich: Arc<EnrichOptions>,
    extra_tags: Arc<Vec<String>>,
    resolver: Arc<dyn TagResolver>,
    mapper: Option<Arc<MetricMapper>>,
    telemetry: Arc<Telemetry>,
    metrics_stats: Option<Arc<MetricsStats>>,
    packet_stats: Option<Arc<PacketStats>>,
    hist_to_dist: bool,
    hist_to_dist_prefix: String,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let maybe_batch = {
                let mut input = self.input.lock().await;
                input.recv().await
            };
            match maybe_batch {
                Some(batch) => self.process_batch(batch).await,
                None => {
                    self.batcher.flush().await;
                    debug!("worker {} input closed, exiting", self.id);
                    return;
                }
            }
        }
    }

    async fn process_batch(&mut self, batch: PacketBatch) {
        for packet in batch {
            self.process_packet(&packet);
            self.pool.release(packet.into_buffer());
        }
        self.batcher.flush().await;
    }

    fn process_packet(&mut self, packet: &Packet) {
        let contents = String::from_utf8_lossy(packet.contents());
        let mut rest: &str = &contents;
        while let Some(message) = next_message(&mut rest) {
            if let Some(stats) = &self.packet_stats {
                stats.record(1);
            }
            match find_message_type(message) {
                MessageType::MetricSample => self.handle_metric(message),
                MessageType::Event => self.handle_event(message),
                MessageType::ServiceCheck => self.handle_service_check(message),
            }
        }
    }

    fn handle_metric(&mut self, message: &str) {
        let samples = match parse_metric_sample(message) {
            Ok(samples) => samples,
            Err(err) => {
                debug!("error parsing metric {:?}: {}", message, err);
                self.telemetry
                    .count_processed(MESSAGE_TYPE_METRICS, STATE_ERROR);
                return;
            }
        };

        for mut sample in samples {
            // The mapper is only consulted when the sample carries no
            // tags, matching the Go agent's behavior.
            if let Some(mapper) = &self.mapper {
                if sample.tags.is_empty() {
                    if let Some(result) = mapper.map(sample.name.as_str()) {
                        sample.name = Ustr::from(&result.name);
                        sample.tags.extend(result.tags);
                    }
                }
            }

            let mut enriched =
                enrich_metric_sample(sample, &self.enrich, self.resolver.as_ref());
            enriched.tags.extend(self.extra_tags.iter().cloned());
            if let Some(origin) = enriched.container_id.clone() {
                enriched.tags.extend(origin_tags(
                    &origin,
                    self.resolver.as_ref(),
                    self.enrich.entity_cardinality,
                ));
            }

            if let Some(stats) = &self.metrics_stats {
                stats.store(enriched.name.as_str());
            }
            self.telemetry.count_processed(MESSAGE_TYPE_METRICS, STATE_OK);

            let dist_copy = if self.hist_to_dist && enriched.mtype == MetricType::Histogram {
                let mut copy = enriched.clone();
                copy.name = Ustr::from(&format!("{}{}", self.hist_to_dist_prefix, copy.name));
                copy.mtype = MetricType::Distribution;
                Some(copy)
            } else {
                None
            };

            self.batcher.append_sample(enriched);
            if let Some(copy) = dist_copy {
                self.batcher.append_sample(copy);
            }
        }
    }

    fn handle_event(&mut self, message: &str) {
        match crate::event::parse_event(message) {
            Ok(event) => {
                let mut enriched = enrich_event(event, &self.enrich, self.resolver.as_ref());
                enriched.tags.extend(self.extra_tags.iter().cloned());
                self.telemetry.count_processed(MESSAGE_TYPE_EVENTS, STATE_OK);
                self.batcher.append_event(enriched);
            }
            Err(err) => {
                debug!("error parsing event {:?}: {}", message, err);
                self.telemetry
                    .count_processed(MESSAGE_TYPE_EVENTS, STATE_ERROR);
            }
        }
    }

    fn handle_service_check(&mut self, message: &str) {
        match crate::service_check::parse_service_check(message) {
            Ok(check) => {
                let mut enriched =
                    enrich_service_check(check, &self.enrich, self.resolver.as_ref());
                enriched.tags.extend(self.extra_tags.iter().cloned());
                self.telemetry
                    .count_processed(MESSAGE_TYPE_SERVICE_CHECKS, STATE_OK);
                self.batcher.append_service_check(enriched);
            }
            Err(err) => {
                debug!("error parsing service check {:?}: {}", message, err);
                self.telemetry
                    .count_processed(MESSAGE_TYPE_SERVICE_CHECKS, STATE_ERROR);
            }
        }
    }
}
