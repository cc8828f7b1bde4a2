// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric sample model and the DogStatsD metric line parser.
//!
//! Wire grammar:
//! `<name>:<v1>[:<v2>...]|<type>[|@<rate>][|#<tag>,<tag>...][|c:<origin>]`

use crate::errors::ParseError;
use ustr::Ustr;

/// Typed kind of a metric sample.
///
/// The wire format only carries `g`, `c`, `h`, `d`, `s` and `ms`; the
/// remaining variants exist for samples synthesized inside the pipeline
/// (count flavors from checks, histogram copies) and map onto the same
/// exporter kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Count,
    Counter,
    MonotonicCount,
    Histogram,
    Historate,
    Distribution,
    Set,
    Timing,
}

impl MetricType {
    fn from_token(token: &str) -> Result<Self, ParseError> {
        match token {
            "g" => Ok(MetricType::Gauge),
            "c" => Ok(MetricType::Counter),
            "h" => Ok(MetricType::Histogram),
            "d" => Ok(MetricType::Distribution),
            "s" => Ok(MetricType::Set),
            "ms" => Ok(MetricType::Timing),
            other => Err(ParseError::UnsupportedType(other.to_string())),
        }
    }

    fn to_token(self) -> &'static str {
        match self {
            MetricType::Gauge => "g",
            MetricType::Count | MetricType::Counter | MetricType::MonotonicCount => "c",
            MetricType::Histogram | MetricType::Historate => "h",
            MetricType::Distribution => "d",
            MetricType::Set => "s",
            MetricType::Timing => "ms",
        }
    }
}

/// One decoded metric sample.
///
/// `host` is empty until enrichment resolves it from a `host:` tag or the
/// process default. For set samples `raw_value` carries the member string
/// and `value` is unused.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: Ustr,
    pub value: f64,
    pub raw_value: Ustr,
    pub sample_rate: f64,
    pub mtype: MetricType,
    pub tags: Vec<String>,
    pub host: String,
    pub container_id: Option<String>,
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.')
}

/// Decodes one metric line into samples, one per value for multi-valued
/// payloads such as `latency:12.5:17.0|h`.
///
/// Unknown optional fields are skipped for wire compatibility; a bad
/// required field fails the whole line without emitting any sample.
pub fn parse_metric_sample(message: &str) -> Result<Vec<MetricSample>, ParseError> {
    let (name_and_values, rest) = message.split_once('|').ok_or(ParseError::MalformedMetric)?;
    let (name, raw_values) = name_and_values
        .split_once(':')
        .ok_or(ParseError::MalformedMetric)?;

    if !valid_name(name) {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    if raw_values.is_empty() {
        return Err(ParseError::InvalidValue(String::new()));
    }

    let mut fields = rest.split('|');
    let mtype = match fields.next() {
        Some(token) if !token.is_empty() => MetricType::from_token(token)?,
        _ => return Err(ParseError::MalformedMetric),
    };

    let mut sample_rate = 1.0;
    let mut tags: Vec<String> = Vec::new();
    let mut container_id: Option<String> = None;

    for field in fields {
        if let Some(rate) = field.strip_prefix('@') {
            let parsed: f64 = rate
                .parse()
                .map_err(|_| ParseError::InvalidSampleRate(rate.to_string()))?;
            if !(parsed > 0.0 && parsed <= 1.0) {
                return Err(ParseError::InvalidSampleRate(rate.to_string()));
            }
            sample_rate = parsed;
        } else if let Some(tag_section) = field.strip_prefix('#') {
            tags.extend(
                tag_section
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            );
        } else if let Some(origin) = field.strip_prefix("c:") {
            if !origin.is_empty() {
                container_id = Some(origin.to_string());
            }
        }
        // Unknown optional fields (e.g. |T<ts> from newer clients) are
        // ignored rather than failing the line.
    }

    let name = Ustr::from(name);

    if mtype == MetricType::Set {
        // The whole value section is a single set member; it is never
        // split on ':' so members may themselves contain colons.
        return Ok(vec![MetricSample {
            name,
            value: 0.0,
            raw_value: Ustr::from(raw_values),
            sample_rate,
            mtype,
            tags,
            host: String::new(),
            container_id,
        }]);
    }

    let mut samples = Vec::with_capacity(1);
    for raw in raw_values.split(':') {
        let value: f64 = raw
            .parse()
            .map_err(|_| ParseError::InvalidValue(raw.to_string()))?;
        samples.push(MetricSample {
            name,
            value,
            raw_value: Ustr::from(raw),
            sample_rate,
            mtype,
            tags: tags.clone(),
            host: String::new(),
            container_id: container_id.clone(),
        });
    }
    Ok(samples)
}

impl MetricSample {
    /// Serializes the sample back to its canonical wire form. The inverse
    /// of [`parse_metric_sample`] for single-valued lines whose tags are
    /// in wire order.
    pub fn to_line(&self) -> String {
        let mut line = if self.mtype == MetricType::Set {
            format!("{}:{}|{}", self.name, self.raw_value, self.mtype.to_token())
        } else {
            format!("{}:{}|{}", self.name, self.value, self.mtype.to_token())
        };
        if self.sample_rate != 1.0 {
            line.push_str(&format!("|@{}", self.sample_rate));
        }
        if !self.tags.is_empty() {
            line.push_str("|#");
            line.push_str(&self.tags.join(","));
        }
        if let Some(origin) = &self.container_id {
            line.push_str("|c:");
            line.push_str(origin);
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(message: &str) -> MetricSample {
        let samples = parse_metric_sample(message).expect("parse failed");
        assert_eq!(samples.len(), 1);
        samples.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_gauge() {
        let sample = parse_one("daemon:666|g");
        assert_eq!(sample.name.as_str(), "daemon");
        assert_eq!(sample.value, 666.0);
        assert_eq!(sample.mtype, MetricType::Gauge);
        assert_eq!(sample.sample_rate, 1.0);
        assert!(sample.tags.is_empty());
    }

    #[test]
    fn test_parse_counter_with_tags() {
        let sample = parse_one("page.views:1|c|#env:prod,host:h1");
        assert_eq!(sample.name.as_str(), "page.views");
        assert_eq!(sample.value, 1.0);
        assert_eq!(sample.mtype, MetricType::Counter);
        assert_eq!(sample.tags, vec!["env:prod", "host:h1"]);
    }

    #[test]
    fn test_parse_sample_rate_and_tags() {
        let sample = parse_one("latency:12.5|h|@0.5|#method:GET,path:/x");
        assert_eq!(sample.sample_rate, 0.5);
        assert_eq!(sample.mtype, MetricType::Histogram);
        assert_eq!(sample.tags, vec!["method:GET", "path:/x"]);
    }

    #[test]
    fn test_parse_multi_value_yields_one_sample_per_value() {
        let samples = parse_metric_sample("latency:12.5:17.0|h|@0.5").expect("parse failed");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 12.5);
        assert_eq!(samples[1].value, 17.0);
        assert_eq!(samples[0].sample_rate, 0.5);
        assert_eq!(samples[1].sample_rate, 0.5);
    }

    #[test]
    fn test_parse_set_keeps_raw_value() {
        let sample = parse_one("users.uniques:user:42|s");
        assert_eq!(sample.mtype, MetricType::Set);
        assert_eq!(sample.raw_value.as_str(), "user:42");
    }

    #[test]
    fn test_parse_timing() {
        let sample = parse_one("req.duration:21|ms");
        assert_eq!(sample.mtype, MetricType::Timing);
        assert_eq!(sample.value, 21.0);
    }

    #[test]
    fn test_parse_container_origin() {
        let sample = parse_one("daemon:666|g|c:abc123");
        assert_eq!(sample.container_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_unknown_optional_field_ignored() {
        let sample = parse_one("daemon:666|g|T1656581409");
        assert_eq!(sample.value, 666.0);
    }

    #[test]
    fn test_parse_rejects_zero_sample_rate() {
        assert_eq!(
            parse_metric_sample("daemon:666|g|@0"),
            Err(ParseError::InvalidSampleRate("0".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range_sample_rate() {
        assert!(parse_metric_sample("daemon:666|g|@1.5").is_err());
        assert!(parse_metric_sample("daemon:666|g|@-0.5").is_err());
    }

    #[test]
    fn test_parse_rejects_unsupported_type() {
        assert_eq!(
            parse_metric_sample("daemon:666|x"),
            Err(ParseError::UnsupportedType("x".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_invalid_name() {
        assert!(matches!(
            parse_metric_sample("1bad:666|g"),
            Err(ParseError::InvalidName(_))
        ));
        assert!(matches!(
            parse_metric_sample("bad-name:666|g"),
            Err(ParseError::InvalidName(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_pieces() {
        assert_eq!(
            parse_metric_sample("daemon:666"),
            Err(ParseError::MalformedMetric)
        );
        assert_eq!(
            parse_metric_sample("daemon|g"),
            Err(ParseError::MalformedMetric)
        );
        assert_eq!(
            parse_metric_sample("daemon:|g"),
            Err(ParseError::InvalidValue(String::new()))
        );
        assert!(parse_metric_sample("daemon:abc|g").is_err());
    }

    #[test]
    fn test_roundtrip_canonical_form() {
        for line in [
            "page.views:1|c",
            "daemon:666|g",
            "latency:12.5|h|@0.5|#method:GET,path:/x",
            "users.uniques:user42|s",
            "req.duration:21|ms|#env:prod",
        ] {
            let sample = parse_one(line);
            assert_eq!(sample.to_line(), line);
        }
    }
}
