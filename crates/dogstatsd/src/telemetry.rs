// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline telemetry, registered on the same registry the exporter
//! publishes through so the counters ride along on the scrape surface.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub const STATE_OK: &str = "ok";
pub const STATE_ERROR: &str = "error";

pub const MESSAGE_TYPE_METRICS: &str = "metrics";
pub const MESSAGE_TYPE_EVENTS: &str = "events";
pub const MESSAGE_TYPE_SERVICE_CHECKS: &str = "service_checks";

/// Counters shared by every pipeline stage.
pub struct Telemetry {
    /// UDP reads by outcome.
    pub udp_packets: IntCounterVec,
    /// Payload bytes read from the socket.
    pub udp_packets_bytes: IntCounter,
    /// Lines processed, by message type and outcome.
    pub processed: IntCounterVec,
    /// Datagrams mirrored to the forward peer, by outcome.
    pub forwarded_packets: IntCounterVec,
    /// Collectors evicted from the exporter cache.
    pub exporter_evictions: IntCounter,
    /// Collector registrations refused by the registry.
    pub exporter_conflicts: IntCounter,
    /// Packets seen during the last full second.
    pub packets_last_second: IntGauge,
}

impl Telemetry {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let udp_packets = IntCounterVec::new(
            Opts::new("dogstatsd_udp_packets", "UDP packets read, by outcome"),
            &["state"],
        )?;
        let udp_packets_bytes = IntCounter::new(
            "dogstatsd_udp_packets_bytes",
            "Payload bytes read from the UDP socket",
        )?;
        let processed = IntCounterVec::new(
            Opts::new(
                "dogstatsd_processed",
                "Lines processed, by message type and outcome",
            ),
            &["message_type", "state"],
        )?;
        let forwarded_packets = IntCounterVec::new(
            Opts::new(
                "dogstatsd_forwarded_packets",
                "Datagrams mirrored to the forward peer, by outcome",
            ),
            &["state"],
        )?;
        let exporter_evictions = IntCounter::new(
            "dogstatsd_exporter_evictions",
            "Collectors evicted from the exporter cache after idling",
        )?;
        let exporter_conflicts = IntCounter::new(
            "dogstatsd_exporter_registration_conflicts",
            "Collector registrations refused by the registry",
        )?;
        let packets_last_second = IntGauge::new(
            "dogstatsd_packets_last_second",
            "Packets seen during the last full second",
        )?;

        registry.register(Box::new(udp_packets.clone()))?;
        registry.register(Box::new(udp_packets_bytes.clone()))?;
        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(forwarded_packets.clone()))?;
        registry.register(Box::new(exporter_evictions.clone()))?;
        registry.register(Box::new(exporter_conflicts.clone()))?;
        registry.register(Box::new(packets_last_second.clone()))?;

        Ok(Telemetry {
            udp_packets,
            udp_packets_bytes,
            processed,
            forwarded_packets,
            exporter_evictions,
            exporter_conflicts,
            packets_last_second,
        })
    }

    pub fn count_processed(&self, message_type: &str, state: &str) {
        self.processed.with_label_values(&[message_type, state]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_registers_on_registry() {
        let registry = Registry::new();
        let telemetry = Telemetry::new(&registry).expect("telemetry creation failed");

        telemetry.udp_packets.with_label_values(&[STATE_OK]).inc();
        telemetry.count_processed(MESSAGE_TYPE_METRICS, STATE_OK);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"dogstatsd_udp_packets"));
        assert!(names.contains(&"dogstatsd_processed"));
        assert!(names.contains(&"dogstatsd_packets_last_second"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let _telemetry = Telemetry::new(&registry).expect("telemetry creation failed");
        assert!(Telemetry::new(&registry).is_err());
    }
}
