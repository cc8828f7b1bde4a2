// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::BridgeError;
use dogstatsd::constants::{
    DEFAULT_BATCH_COUNT, DEFAULT_EXPORTER_IDLE_TTL, DEFAULT_MAPPER_CACHE_SIZE, DEFAULT_POOL_SIZE,
    DEFAULT_QUEUE_SIZE, DEFAULT_STATS_BUFFER, MAX_DATAGRAM_SIZE,
};
use dogstatsd::mapper::MappingProfileConfig;
use std::env;
use std::time::Duration;

const DEFAULT_DOGSTATSD_PORT: u16 = 8125;
const DEFAULT_HTTP_PORT: u16 = 9125;
const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 100;

/// Configuration for the statsd bridge, read from the environment.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Address the DogStatsD UDP socket binds to.
    pub host: String,
    /// DogStatsD UDP port.
    pub port: u16,
    /// Listen on all interfaces instead of `host`.
    pub non_local_traffic: bool,
    /// Kernel receive buffer size; OS default when `None`.
    pub so_rcvbuf: Option<usize>,
    /// Largest accepted datagram.
    pub buffer_size: usize,
    /// Buffers pre-allocated in the packet pool.
    pub pool_size: usize,
    /// Packets per batch before a flush.
    pub batch_count: usize,
    /// Batch byte cap before a flush; defaults to
    /// `batch_count * buffer_size` when unset.
    pub batch_bytes: Option<usize>,
    /// Age of a non-empty batch before a flush, in milliseconds.
    pub flush_timeout_ms: u64,
    /// Bound of the inter-stage channels.
    pub queue_size: usize,
    /// Optional namespace prefix for metric names.
    pub metric_namespace: Option<String>,
    /// Name prefixes exempt from namespacing.
    pub metric_namespace_blacklist: Vec<String>,
    /// Tags appended to every sample, event and service check.
    pub agent_tags: Vec<String>,
    /// Emit a distribution copy of every histogram sample.
    pub histogram_copy_to_distribution: bool,
    /// Name prefix for the distribution copies.
    pub histogram_copy_to_distribution_prefix: String,
    /// Peer to mirror raw datagrams to; disabled when empty.
    pub forward_host: String,
    /// Peer port; disabled when 0.
    pub forward_port: u16,
    /// Entries memoized by the metric mapper.
    pub mapper_cache_size: usize,
    /// Mapper profiles, JSON-encoded in the environment.
    pub mapper_profiles: Vec<MappingProfileConfig>,
    /// Keep per-metric-name debug counters.
    pub metrics_stats_enable: bool,
    /// Run the per-second packet sampler.
    pub agent_stats_enable: bool,
    /// Seconds of history kept by the sampler.
    pub agent_stats_buffer: u32,
    /// Idle lifetime of a registered collector, in seconds.
    pub exporter_idle_ttl_secs: u64,
    /// Port of the Prometheus scrape endpoint.
    pub http_port: u16,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DOGSTATSD_PORT,
            non_local_traffic: false,
            so_rcvbuf: None,
            buffer_size: MAX_DATAGRAM_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            batch_count: DEFAULT_BATCH_COUNT,
            batch_bytes: None,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            queue_size: DEFAULT_QUEUE_SIZE,
            metric_namespace: None,
            metric_namespace_blacklist: Vec::new(),
            agent_tags: Vec::new(),
            histogram_copy_to_distribution: false,
            histogram_copy_to_distribution_prefix: String::new(),
            forward_host: String::new(),
            forward_port: 0,
            mapper_cache_size: DEFAULT_MAPPER_CACHE_SIZE,
            mapper_profiles: Vec::new(),
            metrics_stats_enable: false,
            agent_stats_enable: false,
            agent_stats_buffer: DEFAULT_STATS_BUFFER,
            exporter_idle_ttl_secs: DEFAULT_EXPORTER_IDLE_TTL.as_secs(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, BridgeError> {
        let defaults = BridgeConfig::default();

        let mapper_profiles = match env::var("DD_DOGSTATSD_MAPPER_PROFILES") {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                BridgeError::InvalidConfig(format!("could not parse mapping profiles: {e}"))
            })?,
            Err(_) => Vec::new(),
        };

        let config = BridgeConfig {
            host: env::var("DD_BIND_HOST").unwrap_or(defaults.host),
            port: env_parse("DD_DOGSTATSD_PORT").unwrap_or(defaults.port),
            non_local_traffic: env_bool("DD_DOGSTATSD_NON_LOCAL_TRAFFIC", false),
            so_rcvbuf: env_parse("DD_DOGSTATSD_SO_RCVBUF"),
            buffer_size: env_parse("DD_DOGSTATSD_BUFFER_SIZE").unwrap_or(defaults.buffer_size),
            pool_size: env_parse("DD_DOGSTATSD_POOL_SIZE").unwrap_or(defaults.pool_size),
            batch_count: env_parse("DD_DOGSTATSD_PACKET_BUFFER_SIZE")
                .unwrap_or(defaults.batch_count),
            batch_bytes: env_parse("DD_DOGSTATSD_PACKET_BUFFER_BYTES"),
            flush_timeout_ms: env_parse("DD_DOGSTATSD_PACKET_BUFFER_FLUSH_TIMEOUT_MS")
                .unwrap_or(defaults.flush_timeout_ms),
            queue_size: env_parse("DD_DOGSTATSD_QUEUE_SIZE").unwrap_or(defaults.queue_size),
            metric_namespace: env::var("DD_STATSD_METRIC_NAMESPACE")
                .ok()
                .filter(|val| !val.is_empty()),
            metric_namespace_blacklist: env_list("DD_STATSD_METRIC_NAMESPACE_BLACKLIST"),
            agent_tags: env_list("DD_TAGS"),
            histogram_copy_to_distribution: env_bool("DD_HISTOGRAM_COPY_TO_DISTRIBUTION", false),
            histogram_copy_to_distribution_prefix: env::var(
                "DD_HISTOGRAM_COPY_TO_DISTRIBUTION_PREFIX",
            )
            .unwrap_or_default(),
            forward_host: env::var("DD_STATSD_FORWARD_HOST").unwrap_or_default(),
            forward_port: env_parse("DD_STATSD_FORWARD_PORT").unwrap_or(0),
            mapper_cache_size: env_parse("DD_DOGSTATSD_MAPPER_CACHE_SIZE")
                .unwrap_or(defaults.mapper_cache_size),
            mapper_profiles,
            metrics_stats_enable: env_bool("DD_DOGSTATSD_METRICS_STATS_ENABLE", false),
            agent_stats_enable: env_bool("DD_DOGSTATSD_STATS_ENABLE", false),
            agent_stats_buffer: env_parse("DD_DOGSTATSD_STATS_BUFFER")
                .unwrap_or(defaults.agent_stats_buffer),
            exporter_idle_ttl_secs: env_parse("DD_EXPORTER_IDLE_TTL_SECS")
                .unwrap_or(defaults.exporter_idle_ttl_secs),
            http_port: env_parse("DD_METRICS_HTTP_PORT").unwrap_or(defaults.http_port),
            log_level: env::var("DD_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.port == 0 {
            return Err(BridgeError::InvalidConfig(
                "DogStatsD port must be greater than 0".to_string(),
            ));
        }
        if self.http_port == 0 {
            return Err(BridgeError::InvalidConfig(
                "metrics HTTP port must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size == 0 || self.batch_count == 0 || self.queue_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "buffer size, packet buffer size and queue size must be greater than 0".to_string(),
            ));
        }
        if self.agent_stats_enable && self.agent_stats_buffer == 0 {
            return Err(BridgeError::InvalidConfig(
                "stats buffer must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(BridgeError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Batch byte cap, defaulted against the buffer geometry.
    pub fn effective_batch_bytes(&self) -> usize {
        self.batch_bytes
            .unwrap_or(self.batch_count * self.buffer_size)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn exporter_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.exporter_idle_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let config = BridgeConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = BridgeConfig {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_stats_buffer() {
        let config = BridgeConfig {
            agent_stats_enable: true,
            agent_stats_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BridgeConfig {
            agent_stats_enable: false,
            agent_stats_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_batch_bytes_defaults_to_geometry() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.effective_batch_bytes(),
            config.batch_count * config.buffer_size
        );

        let config = BridgeConfig {
            batch_bytes: Some(1234),
            ..Default::default()
        };
        assert_eq!(config.effective_batch_bytes(), 1234);
    }

    // Serializes the tests that mutate process environment variables.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DD_DOGSTATSD_PORT", "9125");
        env::set_var("DD_TAGS", "env:prod, cluster:us1");
        env::set_var("DD_STATSD_METRIC_NAMESPACE", "myapp");

        let config = BridgeConfig::from_env().expect("config load failed");
        assert_eq!(config.port, 9125);
        assert_eq!(config.agent_tags, vec!["env:prod", "cluster:us1"]);
        assert_eq!(config.metric_namespace.as_deref(), Some("myapp"));

        env::remove_var("DD_DOGSTATSD_PORT");
        env::remove_var("DD_TAGS");
        env::remove_var("DD_STATSD_METRIC_NAMESPACE");
    }

    #[test]
    fn test_from_env_rejects_bad_mapper_profiles() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DD_DOGSTATSD_MAPPER_PROFILES", "{not json");
        let result = BridgeConfig::from_env();
        env::remove_var("DD_DOGSTATSD_MAPPER_PROFILES");
        assert!(result.is_err());
    }
}
