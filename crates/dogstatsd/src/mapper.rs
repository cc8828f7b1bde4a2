// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pattern-directed metric renaming.
//!
//! Profiles are matched by name prefix, rules first-match-wins. Capture
//! groups substitute into the rewritten name and tag templates. Results
//! (including misses) are memoized in a bounded LRU.
//!
//! The mapper is only consulted for samples that carry no tags; the gate
//! is kept for wire compatibility with the Go agent.

use lru::LruCache;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Wildcard,
    Regex,
}

/// One mapping rule as it appears in configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct MetricMappingConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One mapping profile as it appears in configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct MappingProfileConfig {
    pub name: String,
    pub prefix: String,
    pub mappings: Vec<MetricMappingConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("mapping profile is missing a name")]
    MissingProfileName,

    #[error("mapping profile {0} is missing a prefix")]
    MissingProfilePrefix(String),

    #[error("mapping rule in profile {0} is missing a match pattern")]
    MissingMatch(String),

    #[error(
        "invalid wildcard pattern {0:?}: only alphanumerics, '-', '_', '*' and '.' are allowed"
    )]
    InvalidWildcardPattern(String),

    #[error("invalid match regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("mapper cache size must be greater than zero")]
    ZeroCacheSize,
}

/// Outcome of a successful mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapResult {
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug)]
struct MetricMapping {
    regex: Regex,
    name_template: String,
    tags: Vec<(String, String)>,
}

#[derive(Debug)]
struct MappingProfile {
    prefix: String,
    mappings: Vec<MetricMapping>,
}

/// Deterministic renamer over a compiled profile list.
#[derive(Debug)]
pub struct MetricMapper {
    profiles: Vec<MappingProfile>,
    cache: Mutex<LruCache<String, Option<MapResult>>>,
}

fn wildcard_to_regex(pattern: &str) -> Result<Regex, MapperError> {
    if !pattern
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '*' | '.'))
    {
        return Err(MapperError::InvalidWildcardPattern(pattern.to_string()));
    }
    let mut translated = String::with_capacity(pattern.len() + 16);
    translated.push('^');
    for c in pattern.chars() {
        match c {
            '.' => translated.push_str("\\."),
            '*' => translated.push_str("([^.]*)"),
            other => translated.push(other),
        }
    }
    translated.push('$');
    Regex::new(&translated).map_err(|source| MapperError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn build_regex(pattern: &str, match_type: MatchType) -> Result<Regex, MapperError> {
    match match_type {
        MatchType::Wildcard => wildcard_to_regex(pattern),
        MatchType::Regex => {
            Regex::new(&format!("^{pattern}$")).map_err(|source| MapperError::InvalidRegex {
                pattern: pattern.to_string(),
                source,
            })
        }
    }
}

/// Substitutes `$1`-style capture references into `template`.
///
/// A reference to a group that did not participate in the match leaves the
/// whole template literal.
fn expand_template(template: &str, caps: &regex::Captures<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits: String = after.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }
        let index: usize = match digits.parse() {
            Ok(index) => index,
            Err(_) => return template.to_string(),
        };
        match caps.get(index) {
            Some(group) => out.push_str(group.as_str()),
            None => return template.to_string(),
        }
        rest = &after[digits.len()..];
    }
    out.push_str(rest);
    out
}

impl MetricMapper {
    /// Compiles the configured profiles. Any invalid pattern is rejected
    /// here so the daemon never starts partially configured.
    pub fn new(
        profiles: Vec<MappingProfileConfig>,
        cache_size: usize,
    ) -> Result<Self, MapperError> {
        let cache_size = NonZeroUsize::new(cache_size).ok_or(MapperError::ZeroCacheSize)?;

        let mut compiled = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if profile.name.is_empty() {
                return Err(MapperError::MissingProfileName);
            }
            if profile.prefix.is_empty() {
                return Err(MapperError::MissingProfilePrefix(profile.name));
            }
            let mut mappings = Vec::with_capacity(profile.mappings.len());
            for mapping in profile.mappings {
                if mapping.pattern.is_empty() {
                    return Err(MapperError::MissingMatch(profile.name));
                }
                mappings.push(MetricMapping {
                    regex: build_regex(&mapping.pattern, mapping.match_type)?,
                    name_template: mapping.name,
                    tags: mapping.tags.into_iter().collect(),
                });
            }
            compiled.push(MappingProfile {
                prefix: profile.prefix,
                mappings,
            });
        }

        Ok(MetricMapper {
            profiles: compiled,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Maps a metric name through the profiles; `None` when no rule
    /// matches. First matching rule wins.
    pub fn map(&self, name: &str) -> Option<MapResult> {
        {
            #[allow(clippy::expect_used)]
            let mut cache = self.cache.lock().expect("lock poisoned");
            if let Some(result) = cache.get(name) {
                return result.clone();
            }
        }

        let result = self.compute(name);

        #[allow(clippy::expect_used)]
        let mut cache = self.cache.lock().expect("lock poisoned");
        cache.put(name.to_string(), result.clone());
        result
    }

    fn compute(&self, name: &str) -> Option<MapResult> {
        for profile in &self.profiles {
            if profile.prefix != "*" && !name.starts_with(&profile.prefix) {
                continue;
            }
            for mapping in &profile.mappings {
                if let Some(caps) = mapping.regex.captures(name) {
                    let tags = mapping
                        .tags
                        .iter()
                        .map(|(key, template)| {
                            format!("{}:{}", key, expand_template(template, &caps))
                        })
                        .collect();
                    return Some(MapResult {
                        name: expand_template(&mapping.name_template, &caps),
                        tags,
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(prefix: &str, mappings: Vec<MetricMappingConfig>) -> MappingProfileConfig {
        MappingProfileConfig {
            name: "test".to_string(),
            prefix: prefix.to_string(),
            mappings,
        }
    }

    fn wildcard(pattern: &str, name: &str, tags: &[(&str, &str)]) -> MetricMappingConfig {
        MetricMappingConfig {
            pattern: pattern.to_string(),
            match_type: MatchType::Wildcard,
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_wildcard_mapping() {
        let mapper = MetricMapper::new(
            vec![profile(
                "airflow.",
                vec![wildcard(
                    "airflow.job.duration.*.*",
                    "airflow.job.duration",
                    &[("job_type", "$1"), ("job_name", "$2")],
                )],
            )],
            100,
        )
        .expect("mapper build failed");

        let result = mapper
            .map("airflow.job.duration.backfill.mydag")
            .expect("no mapping");
        assert_eq!(result.name, "airflow.job.duration");
        assert_eq!(result.tags, vec!["job_name:mydag", "job_type:backfill"]);
    }

    #[test]
    fn test_regex_mapping() {
        let mapper = MetricMapper::new(
            vec![profile(
                "vm.",
                vec![MetricMappingConfig {
                    pattern: "vm\\.harvest\\.(.*)".to_string(),
                    match_type: MatchType::Regex,
                    name: "vm.harvest".to_string(),
                    tags: [("vm_type".to_string(), "$1".to_string())].into(),
                }],
            )],
            100,
        )
        .expect("mapper build failed");

        let result = mapper.map("vm.harvest.gc").expect("no mapping");
        assert_eq!(result.name, "vm.harvest");
        assert_eq!(result.tags, vec!["vm_type:gc"]);
    }

    #[test]
    fn test_no_match_outside_prefix() {
        let mapper = MetricMapper::new(
            vec![profile(
                "airflow.",
                vec![wildcard("airflow.*", "airflow.any", &[])],
            )],
            100,
        )
        .expect("mapper build failed");

        assert!(mapper.map("other.metric").is_none());
    }

    #[test]
    fn test_star_prefix_matches_everything() {
        let mapper = MetricMapper::new(
            vec![profile("*", vec![wildcard("*.count", "hits", &[])])],
            100,
        )
        .expect("mapper build failed");

        let result = mapper.map("page.count").expect("no mapping");
        assert_eq!(result.name, "hits");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mapper = MetricMapper::new(
            vec![profile(
                "app.",
                vec![
                    wildcard("app.requests.*", "first", &[]),
                    wildcard("app.requests.get", "second", &[]),
                ],
            )],
            100,
        )
        .expect("mapper build failed");

        assert_eq!(mapper.map("app.requests.get").expect("no mapping").name, "first");
    }

    #[test]
    fn test_unresolved_reference_yields_literal_template() {
        let mapper = MetricMapper::new(
            vec![profile(
                "app.",
                vec![wildcard("app.*", "mapped.$9", &[])],
            )],
            100,
        )
        .expect("mapper build failed");

        assert_eq!(mapper.map("app.thing").expect("no mapping").name, "mapped.$9");
    }

    #[test]
    fn test_mapping_is_idempotent_once_rewritten() {
        let mapper = MetricMapper::new(
            vec![profile(
                "airflow.",
                vec![wildcard("airflow.job.duration.*", "job.duration", &[])],
            )],
            100,
        )
        .expect("mapper build failed");

        let mapped = mapper.map("airflow.job.duration.backfill").expect("no mapping");
        assert!(mapper.map(&mapped.name).is_none());
    }

    #[test]
    fn test_invalid_regex_rejected_at_load() {
        let err = MetricMapper::new(
            vec![profile(
                "app.",
                vec![MetricMappingConfig {
                    pattern: "app.(".to_string(),
                    match_type: MatchType::Regex,
                    name: "x".to_string(),
                    tags: BTreeMap::new(),
                }],
            )],
            100,
        )
        .expect_err("expected a build error");
        assert!(matches!(err, MapperError::InvalidRegex { .. }));
    }

    #[test]
    fn test_invalid_wildcard_rejected_at_load() {
        let err = MetricMapper::new(
            vec![profile("app.", vec![wildcard("app.{bad}", "x", &[])])],
            100,
        )
        .expect_err("expected a build error");
        assert!(matches!(err, MapperError::InvalidWildcardPattern(_)));
    }

    #[test]
    fn test_miss_is_memoized() {
        let mapper = MetricMapper::new(
            vec![profile("app.", vec![wildcard("app.*", "x", &[])])],
            2,
        )
        .expect("mapper build failed");

        assert!(mapper.map("nomatch").is_none());
        assert!(mapper.map("nomatch").is_none());
    }

    #[test]
    fn test_profiles_deserialize_from_json() {
        let json = r#"[{
            "name": "airflow",
            "prefix": "airflow.",
            "mappings": [
                {"match": "airflow.job.duration.*.*",
                 "name": "airflow.job.duration",
                 "tags": {"job_type": "$1", "job_name": "$2"}},
                {"match": "airflow\\.dag\\.(.*)",
                 "match_type": "regex",
                 "name": "airflow.dag",
                 "tags": {"dag": "$1"}}
            ]
        }]"#;
        let profiles: Vec<MappingProfileConfig> =
            serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].mappings[0].match_type, MatchType::Wildcard);
        assert_eq!(profiles[0].mappings[1].match_type, MatchType::Regex);
        MetricMapper::new(profiles, 10).expect("mapper build failed");
    }
}
