// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pull surface: `/metrics` in the Prometheus text exposition
//! format, a liveness probe, and the debug stats dump.

use crate::services::BridgeHandle;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tracing::error;

#[derive(Clone)]
struct AppState {
    handle: BridgeHandle,
}

/// Builds the HTTP router over a running bridge.
pub fn router(handle: BridgeHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/debug/stats", get(debug_stats))
        .fallback(not_found)
        .with_state(AppState { handle })
}

async fn metrics(State(state): State<AppState>) -> Response {
    let families = state.handle.registry().gather();
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&families, &mut buffer) {
        error!("text encoding of metrics failed: {}", err);
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed").into_response();
    }
    match String::from_utf8(buffer) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!("generated text metrics are not valid UTF-8: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed").into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    if state.handle.is_stopped() {
        (StatusCode::SERVICE_UNAVAILABLE, "stopping").into_response()
    } else {
        (StatusCode::OK, "ok").into_response()
    }
}

async fn debug_stats(State(state): State<AppState>) -> Response {
    let Some(stats) = state.handle.metrics_stats() else {
        return (StatusCode::NOT_FOUND, "metrics stats are disabled").into_response();
    };
    match stats.json_stats() {
        Ok(json) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response(),
        Err(err) => {
            error!("serializing debug stats failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "serialization failed").into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
