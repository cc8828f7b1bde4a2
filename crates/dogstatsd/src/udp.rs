// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP intake loop.
//!
//! One listener task per socket. Each read acquires a pooled buffer,
//! counts the packet, and hands it to the packet batcher. Read errors are
//! counted and the loop continues; only cancellation (which closes the
//! socket) ends it. Origin detection is not performed for UDP.

use crate::packet::{Packet, PacketPool};
use crate::telemetry::{Telemetry, STATE_ERROR, STATE_OK};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct UdpListenerConfig {
    pub host: String,
    pub port: u16,
    /// Bind all interfaces instead of `host`.
    pub non_local_traffic: bool,
    /// Kernel receive buffer size, left to the OS default when `None`.
    pub so_rcvbuf: Option<usize>,
}

pub struct UdpListener {
    socket: UdpSocket,
    pool: PacketPool,
    output: mpsc::Sender<Packet>,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
}

fn bind_socket(addr: SocketAddr, so_rcvbuf: Option<usize>) -> io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    if let Some(rcvbuf) = so_rcvbuf {
        socket.set_recv_buffer_size(rcvbuf)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

impl UdpListener {
    /// Binds the socket and returns an idle listener.
    pub async fn new(
        config: &UdpListenerConfig,
        pool: PacketPool,
        output: mpsc::Sender<Packet>,
        telemetry: Arc<Telemetry>,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let addr: SocketAddr = if config.non_local_traffic {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port)
        } else {
            let ip: IpAddr = config
                .host
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            SocketAddr::new(ip, config.port)
        };

        let socket = UdpSocket::from_std(bind_socket(addr, config.so_rcvbuf)?)?;
        info!(
            "dogstatsd-udp: successfully initialized on {}",
            socket.local_addr()?
        );

        Ok(UdpListener {
            socket,
            pool,
            output,
            telemetry,
            cancel,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the intake loop until cancelled. Should be spawned on its own
    /// task.
    pub async fn listen(self) {
        debug!("dogstatsd-udp: starting to listen");
        loop {
            let mut buffer = self.pool.acquire();
            let received = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.pool.release(buffer);
                    debug!("dogstatsd-udp: socket closed, listener exiting");
                    return;
                }
                received = self.socket.recv_from(&mut buffer) => received,
            };

            match received {
                Ok((amount, _)) => {
                    self.telemetry.udp_packets.with_label_values(&[STATE_OK]).inc();
                    self.telemetry.udp_packets_bytes.inc_by(amount as u64);
                    buffer.truncate(amount);
                    if self.output.send(Packet::new(buffer)).await.is_err() {
                        debug!("dogstatsd-udp: packet channel closed, listener exiting");
                        return;
                    }
                }
                Err(err) => {
                    self.pool.release(buffer);
                    error!("dogstatsd-udp: error reading packet: {}", err);
                    self.telemetry
                        .udp_packets
                        .with_label_values(&[STATE_ERROR])
                        .inc();
                }
            }
        }
    }
}
