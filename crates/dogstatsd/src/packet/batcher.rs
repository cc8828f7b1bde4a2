// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coalesces datagrams into batches to amortize per-packet overhead in
//! the workers.
//!
//! A batch is flushed when appending the next packet would exceed the
//! byte cap, when the packet count cap is reached, or when the flush
//! timeout since the first append elapses. No packet is ever dropped
//! here; every batch is handed downstream exactly once, in arrival order.

use super::{Packet, PacketBatch};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

pub struct PacketBatcher {
    input: mpsc::Receiver<Packet>,
    output: mpsc::Sender<PacketBatch>,
    batch_count: usize,
    batch_bytes: usize,
    flush_timeout: Duration,
}

impl PacketBatcher {
    pub fn new(
        input: mpsc::Receiver<Packet>,
        output: mpsc::Sender<PacketBatch>,
        batch_count: usize,
        batch_bytes: usize,
        flush_timeout: Duration,
    ) -> Self {
        PacketBatcher {
            input,
            output,
            batch_count,
            batch_bytes,
            flush_timeout,
        }
    }

    /// Runs until the input channel closes; the partial batch is flushed
    /// on the way out.
    pub async fn run(mut self) {
        let mut batch: PacketBatch = Vec::with_capacity(self.batch_count);
        let mut batch_bytes = 0usize;
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                maybe_packet = self.input.recv() => match maybe_packet {
                    Some(packet) => {
                        if !batch.is_empty() && batch_bytes + packet.len() > self.batch_bytes {
                            if !self.flush(&mut batch, &mut batch_bytes, &mut deadline).await {
                                return;
                            }
                        }
                        if batch.is_empty() {
                            deadline = Some(Instant::now() + self.flush_timeout);
                        }
                        batch_bytes += packet.len();
                        batch.push(packet);
                        if batch.len() >= self.batch_count
                            && !self.flush(&mut batch, &mut batch_bytes, &mut deadline).await
                        {
                            return;
                        }
                    }
                    None => {
                        self.flush(&mut batch, &mut batch_bytes, &mut deadline).await;
                        debug!("packet batcher input closed, exiting");
                        return;
                    }
                },
                () = timer => {
                    if !self.flush(&mut batch, &mut batch_bytes, &mut deadline).await {
                        return;
                    }
                }
            }
        }
    }

    /// Hands the current batch downstream. Returns `false` when the
    /// receiving side is gone.
    async fn flush(
        &self,
        batch: &mut PacketBatch,
        batch_bytes: &mut usize,
        deadline: &mut Option<Instant>,
    ) -> bool {
        *deadline = None;
        *batch_bytes = 0;
        if batch.is_empty() {
            return true;
        }
        let full = std::mem::replace(batch, Vec::with_capacity(self.batch_count));
        self.output.send(full).await.is_ok()
    }
}
