// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the nozzle.

use reqwest::StatusCode;

/// Invalid configuration, detected at startup. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Rejected Event Name [{name}] - Valid events: {valid}")]
    UnknownEventKind { name: String, valid: String },

    #[error("Malformed entry [{entry}] in {setting}: expected key:value")]
    MalformedPair { setting: String, entry: String },

    #[error("Unable to parse Sumo Logic endpoints: {0}")]
    Endpoints(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidSetting(String),

    #[error("Unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of a single post attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("endpoint rejected the post with status {0}")]
    Rejected(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unable to compress payload: {0}")]
    Compression(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_event_kind_lists_valid_events() {
        let error = ConfigurationError::UnknownEventKind {
            name: "Foo".to_string(),
            valid: "CounterEvent, Error".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Rejected Event Name [Foo] - Valid events: CounterEvent, Error"
        );
    }

    #[test]
    fn test_rejected_display() {
        let error = DeliveryError::Rejected(StatusCode::TOO_MANY_REQUESTS);
        assert!(error.to_string().contains("429"));
    }
}
