// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_statsd_bridge_core::config::BridgeConfig;
use datadog_statsd_bridge_core::http::router;
use datadog_statsd_bridge_core::services::{BridgeHandle, BridgeServices};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::sleep;

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("probe bind failed");
    socket.local_addr().expect("no local addr").port()
}

async fn start_bridge(metrics_stats_enable: bool) -> (BridgeHandle, SocketAddr) {
    let config = BridgeConfig {
        port: free_udp_port(),
        flush_timeout_ms: 10,
        metrics_stats_enable,
        ..Default::default()
    };
    let handle = BridgeServices::new(config)
        .start()
        .await
        .expect("bridge start failed");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("http bind failed");
    let http_addr = listener.local_addr().expect("no http addr");
    let app = router(handle.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (handle, http_addr)
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write failed");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read failed");
    String::from_utf8_lossy(&response).to_string()
}

#[tokio::test]
async fn metrics_endpoint_serves_text_exposition() {
    let (handle, http_addr) = start_bridge(false).await;

    let client = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("client bind failed");
    client
        .send_to(b"page.views:1|c|#env:prod", handle.listen_addr())
        .await
        .expect("send failed");

    let mut body = String::new();
    for _ in 0..100 {
        body = http_get(http_addr, "/metrics").await;
        if body.contains("page_views") {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    assert!(body.starts_with("HTTP/1.1 200"));
    // Names are post-normalized and the pipeline counters ride along.
    assert!(body.contains("page_views"));
    assert!(body.contains("env=\"prod\""));
    assert!(body.contains("dogstatsd_processed"));
    handle.stop();
}

#[tokio::test]
async fn healthz_reports_liveness() {
    let (handle, http_addr) = start_bridge(false).await;

    let body = http_get(http_addr, "/healthz").await;
    assert!(body.starts_with("HTTP/1.1 200"));

    handle.stop();
    let body = http_get(http_addr, "/healthz").await;
    assert!(body.starts_with("HTTP/1.1 503"));
}

#[tokio::test]
async fn debug_stats_gated_on_configuration() {
    let (handle, http_addr) = start_bridge(false).await;
    let body = http_get(http_addr, "/debug/stats").await;
    assert!(body.starts_with("HTTP/1.1 404"));
    handle.stop();

    let (handle, http_addr) = start_bridge(true).await;
    let client = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("client bind failed");
    client
        .send_to(b"page.views:1|c", handle.listen_addr())
        .await
        .expect("send failed");

    let mut body = String::new();
    for _ in 0..100 {
        body = http_get(http_addr, "/debug/stats").await;
        if body.contains("page.views") {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("\"count\":1"));
    handle.stop();
}
