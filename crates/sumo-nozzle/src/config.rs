// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::appender::filter::{parse_key_values, ContentFilter};
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_IDLE_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES};
use crate::errors::ConfigurationError;
use crate::routing::parse_event_kinds;

/// One Sumo Logic HTTP source, as found in the `SUMO_ENDPOINTS` JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Complete URL of the HTTP source
    pub endpoint: String,
    /// Minimum time between two successful posts, given in nanoseconds
    #[serde(
        rename = "sumo_post_minimum_delay",
        deserialize_with = "deserialize_nanos"
    )]
    pub post_minimum_delay: Duration,
    #[serde(rename = "sumo_category")]
    pub category: String,
    #[serde(rename = "sumo_name")]
    pub name: String,
    #[serde(rename = "sumo_host")]
    pub host: String,
    /// `key:value` pairs added to every record
    pub custom_metadata: String,
    pub include_only_matching_filter: String,
    pub exclude_always_matching_filter: String,
    pub guid: String,
}

impl EndpointConfig {
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        EndpointConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn custom_metadata(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        parse_key_values("custom_metadata", &self.custom_metadata)
    }

    pub fn content_filter(&self) -> Result<ContentFilter, ConfigurationError> {
        ContentFilter::parse(
            &self.include_only_matching_filter,
            &self.exclude_always_matching_filter,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting(
                "Sumo Logic endpoint URL cannot be empty".to_string(),
            ));
        }
        self.custom_metadata()?;
        self.content_filter()?;
        Ok(())
    }
}

fn deserialize_nanos<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = i64::deserialize(deserializer)?;
    Ok(Duration::from_nanos(u64::try_from(nanos).unwrap_or(0)))
}

/// Nozzle configuration
#[derive(Debug, Clone)]
pub struct NozzleConfig {
    pub endpoints: Vec<EndpointConfig>,
    /// Comma separated list of event kinds to forward
    pub events: String,
    /// Number of records that closes a batch
    pub batch_size: usize,
    /// Ship every `LogMessage` field instead of the short allow-list
    pub verbose_log_messages: bool,
    pub idle_flush_interval: Duration,
    /// Retries after the first failed post
    pub max_retries: u32,
    /// Retry 5xx responses instead of giving up on them
    pub retry_server_errors: bool,
    /// Period of the event totals report, `None` when disabled
    pub event_totals_interval: Option<Duration>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for NozzleConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            events: "LogMessage".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            verbose_log_messages: true,
            idle_flush_interval: DEFAULT_IDLE_FLUSH_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_server_errors: false,
            event_totals_interval: None,
            log_level: "info".to_string(),
        }
    }
}

impl NozzleConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, environment-style.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoints = match lookup("SUMO_ENDPOINTS") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => Vec::new(),
        };
        let events = lookup("EVENTS")
            .filter(|val| !val.trim().is_empty())
            .unwrap_or(defaults.events);
        let batch_size = lookup("LOG_EVENTS_BATCH_SIZE")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.batch_size);
        let verbose_log_messages = lookup("VERBOSE_LOG_MESSAGES")
            .map(|val| val.trim().to_lowercase() != "false")
            .unwrap_or(defaults.verbose_log_messages);
        let idle_flush_interval = lookup("IDLE_FLUSH_INTERVAL_SECS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(defaults.idle_flush_interval, Duration::from_secs);
        let max_retries = lookup("SUMO_POST_MAX_RETRIES")
            .and_then(|val| val.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);
        let retry_server_errors = lookup("SUMO_RETRY_SERVER_ERRORS")
            .map(|val| val.trim().to_lowercase() == "true")
            .unwrap_or(defaults.retry_server_errors);
        let event_totals_interval = lookup("EVENT_TOTALS_INTERVAL_SECS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let log_level = lookup("LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            endpoints,
            events,
            batch_size,
            verbose_log_messages,
            idle_flush_interval,
            max_retries,
            retry_server_errors,
            event_totals_interval,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoints.is_empty() {
            return Err(ConfigurationError::InvalidSetting(
                "SUMO_ENDPOINTS must list at least one endpoint".to_string(),
            ));
        }
        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }

        if self.batch_size == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "LOG_EVENTS_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        parse_event_kinds(&self.events)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ENDPOINTS: &str = r#"[{
        "endpoint": "https://collectors.sumologic.com/receiver/v1/http/abc",
        "sumo_post_minimum_delay": 200000000,
        "sumo_category": "cf/logs",
        "sumo_name": "nozzle",
        "sumo_host": "pcf",
        "custom_metadata": "env:prod",
        "include_only_matching_filter": "",
        "exclude_always_matching_filter": "origin:rep",
        "guid": "0f2c"
    }]"#;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn valid() -> NozzleConfig {
        NozzleConfig {
            endpoints: vec![EndpointConfig::new("http://localhost")],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_an_endpoint() {
        assert!(NozzleConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = NozzleConfig::from_lookup(lookup(&[("SUMO_ENDPOINTS", ENDPOINTS)])).unwrap();
        assert_eq!(config.events, "LogMessage");
        assert_eq!(config.batch_size, 500);
        assert!(config.verbose_log_messages);
        assert_eq!(config.idle_flush_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert!(!config.retry_server_errors);
        assert_eq!(config.event_totals_interval, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_endpoints_are_parsed() {
        let config = NozzleConfig::from_lookup(lookup(&[("SUMO_ENDPOINTS", ENDPOINTS)])).unwrap();
        let endpoint = &config.endpoints[0];
        assert_eq!(
            endpoint.endpoint,
            "https://collectors.sumologic.com/receiver/v1/http/abc"
        );
        assert_eq!(endpoint.post_minimum_delay, Duration::from_millis(200));
        assert_eq!(endpoint.category, "cf/logs");
        assert_eq!(endpoint.name, "nozzle");
        assert_eq!(endpoint.host, "pcf");
        assert_eq!(
            endpoint.custom_metadata().unwrap(),
            vec![("env".to_string(), "prod".to_string())]
        );
        assert!(!endpoint.content_filter().unwrap().is_empty());
    }

    #[test]
    fn test_missing_endpoint_keys_default() {
        let config = NozzleConfig::from_lookup(lookup(&[(
            "SUMO_ENDPOINTS",
            r#"[{"endpoint":"http://localhost","unknown":1}]"#,
        )]))
        .unwrap();
        assert_eq!(config.endpoints[0].post_minimum_delay, Duration::ZERO);
        assert!(config.endpoints[0].name.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = NozzleConfig::from_lookup(lookup(&[
            ("SUMO_ENDPOINTS", ENDPOINTS),
            ("EVENTS", "LogMessage,ValueMetric"),
            ("LOG_EVENTS_BATCH_SIZE", "50"),
            ("VERBOSE_LOG_MESSAGES", "FALSE"),
            ("IDLE_FLUSH_INTERVAL_SECS", "3"),
            ("SUMO_POST_MAX_RETRIES", "2"),
            ("SUMO_RETRY_SERVER_ERRORS", "true"),
            ("EVENT_TOTALS_INTERVAL_SECS", "60"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();
        assert_eq!(config.events, "LogMessage,ValueMetric");
        assert_eq!(config.batch_size, 50);
        assert!(!config.verbose_log_messages);
        assert_eq!(config.idle_flush_interval, Duration::from_secs(3));
        assert_eq!(config.max_retries, 2);
        assert!(config.retry_server_errors);
        assert_eq!(config.event_totals_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_malformed_endpoints_json() {
        let err = NozzleConfig::from_lookup(lookup(&[("SUMO_ENDPOINTS", "{not json")])).unwrap_err();
        assert!(matches!(err, ConfigurationError::Endpoints(_)));
    }

    #[test]
    fn test_validate_unknown_event_kind() {
        let config = NozzleConfig {
            events: "LogMessage,Foo".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::UnknownEventKind { .. })
        ));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let config = NozzleConfig {
            batch_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = NozzleConfig {
            log_level: "invalid".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint_settings() {
        let config = NozzleConfig {
            endpoints: vec![EndpointConfig::new("  ")],
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = NozzleConfig {
            endpoints: vec![EndpointConfig {
                custom_metadata: "novalue".to_string(),
                ..EndpointConfig::new("http://localhost")
            }],
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MalformedPair { .. })
        ));
    }
}
