// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! DogStatsD-compatible metrics intake re-exported through Prometheus.
//!
//! The pipeline: UDP listener → packet batcher → (optional forwarder) →
//! worker pool → parser → tag enrichment → exporter cache → Prometheus
//! scrape. Every stage reports into [`telemetry::Telemetry`], which rides
//! along on the same registry the exporter publishes through.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod constants;
pub mod enrich;
pub mod errors;
pub mod event;
pub mod exporter;
pub mod forwarder;
pub mod mapper;
pub mod message;
pub mod metric;
pub mod packet;
pub mod server;
pub mod service_check;
pub mod stats;
pub mod telemetry;
pub mod udp;
pub mod util;
