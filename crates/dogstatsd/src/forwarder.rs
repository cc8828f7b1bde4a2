// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional raw-datagram mirroring to a peer collector.
//!
//! When configured, the forwarder sits between the packet batcher and the
//! workers: each batch is first written out datagram by datagram to the
//! peer UDP socket, then handed on for local processing. Write failures
//! are logged and counted, never propagated; local processing is never
//! skipped because a mirror write failed.

use crate::constants::FORWARD_WRITE_TIMEOUT;
use crate::packet::PacketBatch;
use crate::telemetry::{Telemetry, STATE_ERROR, STATE_OK};
use std::io;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct Forwarder {
    socket: UdpSocket,
    telemetry: Arc<Telemetry>,
}

impl Forwarder {
    /// Connects the peer socket. A connection failure is reported to the
    /// caller, which keeps running without a forwarder.
    pub async fn connect(host: &str, port: u16, telemetry: Arc<Telemetry>) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        debug!("statsd forwarder connected to {}:{}", host, port);
        Ok(Forwarder { socket, telemetry })
    }

    /// Mirrors batches from `input` to the peer and relays them to
    /// `output` until the input channel closes.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<PacketBatch>,
        output: mpsc::Sender<PacketBatch>,
    ) {
        while let Some(batch) = input.recv().await {
            for packet in &batch {
                let write = timeout(FORWARD_WRITE_TIMEOUT, self.socket.send(packet.contents()));
                let state = match write.await {
                    Ok(Ok(_)) => STATE_OK,
                    Ok(Err(err)) => {
                        warn!("forwarding packet failed: {}", err);
                        STATE_ERROR
                    }
                    Err(_) => {
                        warn!("forwarding packet timed out");
                        STATE_ERROR
                    }
                };
                self.telemetry
                    .forwarded_packets
                    .with_label_values(&[state])
                    .inc();
            }
            if output.send(batch).await.is_err() {
                debug!("forwarder output closed, exiting");
                return;
            }
        }
        debug!("forwarder input closed, exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use prometheus::Registry;

    #[tokio::test]
    async fn test_mirrors_datagrams_then_forwards_batch() {
        let registry = Registry::new();
        let telemetry = Arc::new(Telemetry::new(&registry).expect("telemetry creation failed"));

        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer bind failed");
        let peer_addr = peer.local_addr().expect("no peer addr");

        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (local_tx, mut local_rx) = mpsc::channel(4);
        let forwarder = Forwarder::connect("127.0.0.1", peer_addr.port(), telemetry)
            .await
            .expect("connect failed");
        tokio::spawn(forwarder.run(batch_rx, local_tx));

        let batch = vec![
            Packet::new(b"a:1|c".to_vec()),
            Packet::new(b"b:2|g".to_vec()),
        ];
        batch_tx.send(batch).await.expect("send failed");

        // The peer sees both datagrams bit-for-bit.
        let mut buf = [0u8; 64];
        let n = peer.recv(&mut buf).await.expect("peer recv failed");
        assert_eq!(&buf[..n], b"a:1|c");
        let n = peer.recv(&mut buf).await.expect("peer recv failed");
        assert_eq!(&buf[..n], b"b:2|g");

        // Local processing still receives the batch.
        let local = local_rx.recv().await.expect("no local batch");
        assert_eq!(local.len(), 2);
    }
}
