// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-worker scratch accumulator for typed output.
//!
//! Each worker owns one batcher and flushes it once per packet batch, so
//! downstream consumers see bulk deliveries instead of single samples.

use crate::event::Event;
use crate::metric::MetricSample;
use crate::service_check::ServiceCheck;
use tokio::sync::mpsc;

/// Downstream ends of the pipeline, one channel per payload type.
#[derive(Clone)]
pub struct ServerOutputs {
    pub samples: mpsc::Sender<Vec<MetricSample>>,
    pub events: mpsc::Sender<Vec<Event>>,
    pub service_checks: mpsc::Sender<Vec<ServiceCheck>>,
}

pub struct Batcher {
    samples: Vec<MetricSample>,
    events: Vec<Event>,
    service_checks: Vec<ServiceCheck>,
    outputs: ServerOutputs,
}

impl Batcher {
    pub fn new(outputs: ServerOutputs) -> Self {
        Batcher {
            samples: Vec::new(),
            events: Vec::new(),
            service_checks: Vec::new(),
            outputs,
        }
    }

    pub fn append_sample(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    pub fn append_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn append_service_check(&mut self, service_check: ServiceCheck) {
        self.service_checks.push(service_check);
    }

    /// Delivers everything accumulated since the last flush. Blocks on
    /// full downstream channels, which is how backpressure propagates up
    /// to the listener.
    pub async fn flush(&mut self) {
        if !self.samples.is_empty() {
            let samples = std::mem::take(&mut self.samples);
            let _ = self.outputs.samples.send(samples).await;
        }
        if !self.events.is_empty() {
            let events = std::mem::take(&mut self.events);
            let _ = self.outputs.events.send(events).await;
        }
        if !self.service_checks.is_empty() {
            let service_checks = std::mem::take(&mut self.service_checks);
            let _ = self.outputs.service_checks.send(service_checks).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::parse_metric_sample;

    fn outputs() -> (
        ServerOutputs,
        mpsc::Receiver<Vec<MetricSample>>,
        mpsc::Receiver<Vec<Event>>,
        mpsc::Receiver<Vec<ServiceCheck>>,
    ) {
        let (samples_tx, samples_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::channel(4);
        let (checks_tx, checks_rx) = mpsc::channel(4);
        (
            ServerOutputs {
                samples: samples_tx,
                events: events_tx,
                service_checks: checks_tx,
            },
            samples_rx,
            events_rx,
            checks_rx,
        )
    }

    #[tokio::test]
    async fn test_flush_delivers_in_bulk() {
        let (outputs, mut samples_rx, _events_rx, _checks_rx) = outputs();
        let mut batcher = Batcher::new(outputs);

        for line in ["a:1|c", "b:2|g"] {
            batcher.append_sample(parse_metric_sample(line).expect("parse failed").remove(0));
        }
        batcher.flush().await;

        let batch = samples_rx.recv().await.expect("no batch");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let (outputs, mut samples_rx, _events_rx, _checks_rx) = outputs();
        let mut batcher = Batcher::new(outputs);
        batcher.flush().await;
        assert!(samples_rx.try_recv().is_err());
    }
}
