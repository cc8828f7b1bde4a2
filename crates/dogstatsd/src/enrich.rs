// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tag enrichment: resolves `host:` tags into the sample host field,
//! expands internal entity-id tags through the tag resolver, and applies
//! the configured metric namespace.

use crate::event::Event;
use crate::metric::MetricSample;
use crate::service_check::ServiceCheck;
use tracing::debug;
use ustr::Ustr;

const HOST_TAG_PREFIX: &str = "host:";
const ENTITY_ID_TAG_PREFIX: &str = "dd.internal.entity_id:";

/// Entity prefix for pod entity-id tags handed to the resolver.
/// Entity-id enrichment is currently only supported for pods.
pub const POD_ENTITY_PREFIX: &str = "kubernetes_pod://";

/// How many tags the resolver should return for an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagCardinality {
    #[default]
    Low,
    Orchestrator,
    High,
}

#[derive(Debug, thiserror::Error)]
pub enum TagResolveError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("tag resolution timed out")]
    Timeout,
}

/// External collaborator mapping an entity id to its tag list.
///
/// Implementations must be bounded in time; the resolver is called from
/// the worker hot loop.
pub trait TagResolver: Send + Sync {
    fn resolve(
        &self,
        entity: &str,
        cardinality: TagCardinality,
    ) -> Result<Vec<String>, TagResolveError>;
}

/// Resolver used when no workload metadata source is wired in.
pub struct NoopTagResolver;

impl TagResolver for NoopTagResolver {
    fn resolve(
        &self,
        entity: &str,
        _cardinality: TagCardinality,
    ) -> Result<Vec<String>, TagResolveError> {
        Err(TagResolveError::UnknownEntity(entity.to_string()))
    }
}

/// Knobs applied while enriching parsed lines.
#[derive(Clone, Debug, Default)]
pub struct EnrichOptions {
    /// Namespace prepended to metric names, already `.`-terminated.
    pub metric_prefix: String,
    /// Name prefixes exempt from namespacing.
    pub metric_prefix_blacklist: Vec<String>,
    /// Host used when the line carries no `host:` tag.
    pub default_hostname: String,
    /// Cardinality requested from the tag resolver.
    pub entity_cardinality: TagCardinality,
}

/// Rewrites a tag list, extracting the host and expanding entity-id tags.
///
/// Surviving tags keep their first-seen order; resolver-supplied tags are
/// appended. The output never contains `host:` or entity-id tags, which
/// makes the function idempotent.
pub fn enrich_tags(
    tags: Vec<String>,
    default_hostname: &str,
    resolver: &dyn TagResolver,
    cardinality: TagCardinality,
) -> (Vec<String>, String) {
    if tags.is_empty() {
        return (tags, default_hostname.to_string());
    }

    let mut host = default_hostname.to_string();
    let mut kept: Vec<String> = Vec::with_capacity(tags.len());
    let mut extra: Vec<String> = Vec::new();

    for tag in tags {
        if let Some(tag_host) = tag.strip_prefix(HOST_TAG_PREFIX) {
            host = tag_host.to_string();
        } else if let Some(entity_id) = tag.strip_prefix(ENTITY_ID_TAG_PREFIX) {
            let entity = format!("{POD_ENTITY_PREFIX}{entity_id}");
            match resolver.resolve(&entity, cardinality) {
                Ok(entity_tags) => extra.extend(entity_tags),
                Err(err) => debug!("Cannot get tags for entity {}: {}", entity, err),
            }
        } else {
            kept.push(tag);
        }
    }

    kept.extend(extra);
    (kept, host)
}

/// Tags attached to a client-supplied container origin, if resolvable.
pub fn origin_tags(
    origin: &str,
    resolver: &dyn TagResolver,
    cardinality: TagCardinality,
) -> Vec<String> {
    match resolver.resolve(origin, cardinality) {
        Ok(tags) => tags,
        Err(err) => {
            debug!("Cannot get tags for origin {}: {}", origin, err);
            Vec::new()
        }
    }
}

fn namespaced_name(name: Ustr, options: &EnrichOptions) -> Ustr {
    if options.metric_prefix.is_empty() {
        return name;
    }
    let blacklisted = options
        .metric_prefix_blacklist
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()));
    if blacklisted {
        name
    } else {
        Ustr::from(&format!("{}{}", options.metric_prefix, name))
    }
}

/// Applies namespacing and tag enrichment to a parsed metric sample.
pub fn enrich_metric_sample(
    mut sample: MetricSample,
    options: &EnrichOptions,
    resolver: &dyn TagResolver,
) -> MetricSample {
    sample.name = namespaced_name(sample.name, options);
    let (tags, host) = enrich_tags(
        std::mem::take(&mut sample.tags),
        &options.default_hostname,
        resolver,
        options.entity_cardinality,
    );
    sample.tags = tags;
    sample.host = host;
    sample
}

/// Enriches an event; the `h:` wire field wins over the resolved host.
pub fn enrich_event(mut event: Event, options: &EnrichOptions, resolver: &dyn TagResolver) -> Event {
    let (tags, host_from_tags) = enrich_tags(
        std::mem::take(&mut event.tags),
        &options.default_hostname,
        resolver,
        options.entity_cardinality,
    );
    event.tags = tags;
    if event.host.is_empty() {
        event.host = host_from_tags;
    }
    event
}

/// Enriches a service check; the `h:` wire field wins over the resolved
/// host.
pub fn enrich_service_check(
    mut check: ServiceCheck,
    options: &EnrichOptions,
    resolver: &dyn TagResolver,
) -> ServiceCheck {
    let (tags, host_from_tags) = enrich_tags(
        std::mem::take(&mut check.tags),
        &options.default_hostname,
        resolver,
        options.entity_cardinality,
    );
    check.tags = tags;
    if check.host.is_empty() {
        check.host = host_from_tags;
    }
    check
}
