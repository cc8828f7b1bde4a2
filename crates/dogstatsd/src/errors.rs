// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors produced while decoding a single DogStatsD line.
///
/// A parse error is always scoped to one line; the surrounding datagram
/// keeps being processed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid metric name: {0}")]
    InvalidName(String),

    #[error("invalid metric value: {0}")]
    InvalidValue(String),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(String),

    #[error("unsupported metric type: {0}")]
    UnsupportedType(String),

    #[error("malformed metric message")]
    MalformedMetric,

    #[error("malformed event message")]
    MalformedEvent,

    #[error("event title or text length exceeds the payload")]
    EventLengthOverflow,

    #[error("malformed service check message")]
    MalformedServiceCheck,

    #[error("invalid service check status: {0}")]
    InvalidServiceCheckStatus(String),
}

/// Error constructing a pipeline component.
#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::UnsupportedType("x".to_string()).to_string(),
            "unsupported metric type: x"
        );
        assert_eq!(
            ParseError::MalformedMetric.to_string(),
            "malformed metric message"
        );
    }
}
