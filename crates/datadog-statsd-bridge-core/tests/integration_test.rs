// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_statsd_bridge_core::config::BridgeConfig;
use datadog_statsd_bridge_core::services::BridgeServices;
use prometheus::proto::MetricFamily;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::sleep;

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("probe bind failed");
    socket.local_addr().expect("no local addr").port()
}

fn find_family(families: &[MetricFamily], name: &str) -> Option<MetricFamily> {
    families.iter().find(|f| f.get_name() == name).cloned()
}

#[tokio::test]
async fn bridge_ingests_and_exports_series() {
    let config = BridgeConfig {
        port: free_udp_port(),
        flush_timeout_ms: 10,
        ..Default::default()
    };
    let handle = BridgeServices::new(config)
        .start()
        .await
        .expect("bridge start failed");

    let client = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("client bind failed");
    client
        .send_to(b"page.views:1|c|#env:prod\n_sc|db.ping|0|#env:prod|m:ok\n", handle.listen_addr())
        .await
        .expect("send failed");

    // Wait for the pipeline to project both lines onto the registry.
    let mut found = None;
    for _ in 0..100 {
        let families = handle.registry().gather();
        if let Some(family) = find_family(&families, "page_views") {
            if find_family(&families, "_sc_db").is_some() {
                found = Some(family);
                break;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    let family = found.expect("series never appeared on the scrape surface");

    let metric = &family.get_metric()[0];
    assert_eq!(metric.get_counter().get_value(), 1.0);
    assert!(metric
        .get_label()
        .iter()
        .any(|l| l.get_name() == "env" && l.get_value() == "prod"));
    // The resolved host rides along as the _agent_ label.
    assert!(metric.get_label().iter().any(|l| l.get_name() == "_agent_"));

    assert_eq!(handle.live_series(), 2);

    // Stopping drains the pipeline and deregisters every collector.
    handle.stop();
    let mut deregistered = false;
    for _ in 0..100 {
        if handle.live_series() == 0
            && find_family(&handle.registry().gather(), "page_views").is_none()
        {
            deregistered = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(deregistered, "collectors survived shutdown");
}

#[tokio::test]
async fn bridge_stop_is_idempotent() {
    let config = BridgeConfig {
        port: free_udp_port(),
        ..Default::default()
    };
    let handle = BridgeServices::new(config)
        .start()
        .await
        .expect("bridge start failed");

    handle.stop();
    handle.stop();
    assert!(handle.is_stopped());
}
