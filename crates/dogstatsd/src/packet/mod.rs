// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pooled packets and the size/count/time bounded packet batcher.

pub mod batcher;
pub mod pool;

pub use batcher::PacketBatcher;
pub use pool::PacketPool;

/// One datagram as read from the socket, backed by a pooled buffer.
///
/// The buffer is truncated to the received length; ownership moves down
/// the pipeline with the packet and returns to the pool when the worker
/// is done with the batch.
#[derive(Debug)]
pub struct Packet {
    buffer: Vec<u8>,
}

impl Packet {
    pub fn new(buffer: Vec<u8>) -> Self {
        Packet { buffer }
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Datagrams handed to one worker as a unit.
pub type PacketBatch = Vec<Packet>;
