// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Projection of enriched samples onto Prometheus series identity.
//!
//! The fingerprint is `symbol|name|label1|label2|...` over the normalized
//! name and the sorted, uniqued label names. Two samples share a
//! fingerprint exactly when they must share a collector.

use crate::metric::{MetricSample, MetricType};
use crate::service_check::{ServiceCheck, ServiceCheckStatus};
use crate::util::sort_uniq;

const BLANK_VALUE: &str = "nil";

/// Collector flavor a sample resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorKind {
    Gauge,
    Counter,
    Histogram,
}

impl CollectorKind {
    pub fn symbol(self) -> char {
        match self {
            CollectorKind::Gauge => 'g',
            CollectorKind::Counter => 'c',
            CollectorKind::Histogram => 'h',
        }
    }
}

fn kind_of(mtype: MetricType) -> CollectorKind {
    match mtype {
        MetricType::Gauge => CollectorKind::Gauge,
        MetricType::Count
        | MetricType::Counter
        | MetricType::MonotonicCount
        | MetricType::Set => CollectorKind::Counter,
        MetricType::Histogram
        | MetricType::Historate
        | MetricType::Distribution
        | MetricType::Timing => CollectorKind::Histogram,
    }
}

fn normalize(s: &str) -> String {
    s.replace('.', "_").trim().to_string()
}

fn generate_key(kind: CollectorKind, name: &str, label_names: &[String]) -> String {
    let mut key = String::with_capacity(64);
    key.push(kind.symbol());
    key.push('|');
    key.push_str(name);
    for label in label_names {
        key.push('|');
        key.push_str(label);
    }
    key
}

/// One observation addressed at a concrete collector.
#[derive(Clone, Debug)]
pub struct PromSample {
    pub key: String,
    pub kind: CollectorKind,
    pub name: String,
    pub label_names: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl PromSample {
    pub fn from_metric(sample: &MetricSample) -> PromSample {
        let kind = kind_of(sample.mtype);
        let name = normalize(sample.name.as_str());
        let mut value = sample.value;

        let mut tags = Vec::with_capacity(sample.tags.len() + 3);
        tags.extend(sample.tags.iter().cloned());

        if sample.mtype == MetricType::Set {
            let raw_value = sample.raw_value.trim();
            if !raw_value.is_empty() {
                tags.push(format!("_setOf_{raw_value}:1"));
            }
            value = 1.0;
        }

        let host = sample.host.trim();
        if !host.is_empty() {
            tags.push(format!("_agent_:{host}"));
        }
        tags.push(format!("_rate_:{:.3}", sample.sample_rate));

        let tags = sort_uniq(tags);

        let mut label_names = Vec::with_capacity(tags.len());
        let mut label_values = Vec::with_capacity(tags.len());
        let mut method = String::new();
        let mut path = String::new();
        for tag in &tags {
            // A tag that does not split into exactly key and value is
            // left out of the label set, matching the original exporter.
            let parts: Vec<&str> = tag.split(':').collect();
            if parts.len() != 2 {
                continue;
            }
            let tag_name = normalize(parts[0]);
            if tag_name.is_empty() {
                continue;
            }
            let tag_value = parts[1].trim();
            let tag_value = if tag_value.is_empty() {
                BLANK_VALUE
            } else {
                tag_value
            };

            if tag_name == "method" {
                method = tag_value.to_string();
            } else if tag_name == "path" {
                path = tag_value.to_string();
            }

            label_names.push(tag_name);
            label_values.push(tag_value.to_string());
        }
        if !method.is_empty() && !path.is_empty() {
            label_names.push("apiname".to_string());
            label_values.push(format!("{method} {path}"));
        }

        let key = generate_key(kind, &name, &label_names);
        PromSample {
            key,
            kind,
            name,
            label_names,
            label_values,
            value,
        }
    }

    /// Projects a service check onto a counter named `_sc_<prefix>` with
    /// the remainder of the check name as a `_service_` label; the value
    /// is 1 for OK and 0 otherwise, a uniform pull surface for alerting.
    pub fn from_service_check(check: &ServiceCheck) -> PromSample {
        let (name, service) = check_name_and_service(&check.name);
        let value = match check.status {
            ServiceCheckStatus::Ok => 1.0,
            _ => 0.0,
        };

        let mut tags = Vec::with_capacity(check.tags.len() + 2);
        tags.extend(check.tags.iter().cloned());
        tags.push(format!("_service_:{service}"));

        let host = check.host.trim();
        if !host.is_empty() {
            tags.push(format!("hostname:{host}"));
        }

        let tags = sort_uniq(tags);

        let mut label_names = Vec::with_capacity(tags.len());
        let mut label_values = Vec::with_capacity(tags.len());
        for tag in &tags {
            let parts: Vec<&str> = tag.split(':').collect();
            if parts.len() != 2 {
                continue;
            }
            let tag_name = normalize(parts[0]);
            if tag_name.is_empty() {
                continue;
            }
            let tag_value = parts[1].trim();
            let tag_value = if tag_value.is_empty() {
                BLANK_VALUE
            } else {
                tag_value
            };
            label_names.push(tag_name);
            label_values.push(tag_value.to_string());
        }

        let key = generate_key(CollectorKind::Counter, &name, &label_names);
        PromSample {
            key,
            kind: CollectorKind::Counter,
            name,
            label_names,
            label_values,
            value,
        }
    }
}

/// Splits a normalized check name at its first underscore into the
/// exported metric name and the `_service_` label value.
fn check_name_and_service(check_name: &str) -> (String, String) {
    let normalized = normalize(check_name);
    match normalized.find('_') {
        None => ("_sc_".to_string(), normalized),
        Some(split_at) => {
            let prefix = &normalized[..split_at];
            let service = &normalized[split_at + 1..];
            if prefix.is_empty() {
                ("_sc_".to_string(), service.to_string())
            } else if service.is_empty() {
                ("_sc_".to_string(), prefix.to_string())
            } else {
                (format!("_sc_{prefix}"), service.to_string())
            }
        }
    }
}
