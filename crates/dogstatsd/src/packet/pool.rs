// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reusable fixed-size packet buffers.
//!
//! The pool removes per-datagram allocation from the read loop. A buffer
//! is held by at most one party at a time: the listener acquires it, the
//! packet travels through the pipeline owning it, and the worker releases
//! it after the batch is processed.

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

impl PacketPool {
    /// Creates a pool of `capacity` buffers of `buffer_size` bytes each,
    /// all pre-allocated.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot overflow: the queue was sized for exactly this many.
            let _ = free.push(vec![0u8; buffer_size]);
        }
        PacketPool {
            inner: Arc::new(PoolInner { free, buffer_size }),
        }
    }

    /// Hands out a zero-filled buffer of `buffer_size` length, allocating
    /// a fresh one when the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        match self.inner.free.pop() {
            Some(mut buffer) => {
                buffer.resize(self.inner.buffer_size, 0);
                buffer
            }
            None => vec![0u8; self.inner.buffer_size],
        }
    }

    /// Returns a buffer to the pool. Surplus buffers beyond the pool's
    /// capacity are dropped.
    pub fn release(&self, buffer: Vec<u8>) {
        let _ = self.inner.free.push(buffer);
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}
