// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur while configuring or starting the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start DogStatsD server: {0}")]
    ServerStart(#[from] dogstatsd::server::ServerError),

    #[error("Failed to build metric mapper: {0}")]
    Mapper(#[from] dogstatsd::mapper::MapperError),

    #[error("Failed to set up the metric registry: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Failed to start statistics: {0}")]
    Stats(#[from] dogstatsd::errors::CreationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BridgeError::InvalidConfig("port must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: port must be greater than 0"
        );
    }
}
