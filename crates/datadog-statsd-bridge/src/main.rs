// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use datadog_statsd_bridge_core::config::BridgeConfig;
use datadog_statsd_bridge_core::http::router;
use datadog_statsd_bridge_core::services::BridgeServices;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let http_port = config.http_port;
    let handle = match BridgeServices::new(config).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error starting statsd bridge: {e}");
            return;
        }
    };

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error binding metrics HTTP port {http_port}: {e}");
            handle.stop();
            return;
        }
    };
    info!("metrics: serving /metrics on port {http_port}");

    let app = router(handle.clone());
    let shutdown_handle = handle.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { shutdown_handle.stopped().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("metrics HTTP server error: {e}");
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt, shutting down"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    handle.stop();
    let _ = server.await;

    if let Some(stats) = handle.metrics_stats() {
        debug!("processed metrics:\n{}", stats.format_table());
    }
    info!("statsd bridge stopped");
}
