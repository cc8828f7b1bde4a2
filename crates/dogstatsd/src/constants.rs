// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tunable defaults for the DogStatsD intake pipeline.

use std::time::Duration;

/// Largest datagram the listener will read. Matches the Go Agent default.
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

/// Packets coalesced into one batch before it is handed to a worker.
pub const DEFAULT_BATCH_COUNT: usize = 32;

/// Oldest age of a non-empty packet batch before it is force-flushed.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound of the packet and batch channels between pipeline stages.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Buffers pre-allocated in the packet pool.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Entries memoized by the metric mapper.
pub const DEFAULT_MAPPER_CACHE_SIZE: usize = 1000;

/// Idle lifetime of a registered collector before it is evicted.
pub const DEFAULT_EXPORTER_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cadence of the exporter's idle-entry sweep.
pub const DEFAULT_EXPORTER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on a single forwarder UDP write.
pub const FORWARD_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Seconds of history kept by the per-second packet sampler.
pub const DEFAULT_STATS_BUFFER: u32 = 10;
