// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one compressed stream to a Sumo Logic HTTP source.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::appender::format::Stream;
use crate::config::EndpointConfig;
use crate::constants::{
    CARBON2_CONTENT_TYPE, CLIENT_NAME, CLIENT_VERSION, CONNECTION_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_INTERVAL, SUMO_CATEGORY_HEADER, SUMO_CLIENT_HEADER, SUMO_HOST_HEADER,
    SUMO_NAME_HEADER,
};
use crate::errors::{ConfigurationError, DeliveryError};

/// What to do with a 5xx answer from the collector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerErrorPolicy {
    /// Give up on the payload without retrying.
    #[default]
    Terminal,
    /// Treat it like any other rejection.
    Retry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Posts attempted after the first one failed
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: DEFAULT_MAX_RETRIES,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Nothing to send.
    Skipped,
    Delivered { attempts: u32 },
    /// A server error under [`ServerErrorPolicy::Terminal`].
    Unretried { status: StatusCode },
    RetriesExhausted {
        attempts: u32,
        last_error: DeliveryError,
    },
    /// The payload could not be prepared for sending.
    Dropped(DeliveryError),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

enum Attempt {
    Success,
    Terminal(StatusCode),
    Failed(DeliveryError),
}

#[derive(Debug)]
pub struct SumoSender {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    retry: RetryPolicy,
    server_errors: ServerErrorPolicy,
    min_post_delay: Duration,
    /// Start of the last successful post, shared by every delivery of this endpoint. Held
    /// from the pacing wait until the post completes while a minimum delay is configured.
    last_post: Mutex<Option<Instant>>,
}

impl SumoSender {
    pub fn new(
        endpoint: &EndpointConfig,
        retry: RetryPolicy,
        server_errors: ServerErrorPolicy,
    ) -> Result<Self, ConfigurationError> {
        let client = reqwest::Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(SumoSender {
            client,
            url: endpoint.endpoint.clone(),
            headers: build_headers(endpoint)?,
            retry,
            server_errors,
            min_post_delay: endpoint.post_minimum_delay,
            last_post: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Compresses and posts a stream, retrying rejections up to the retry bound.
    ///
    /// Failures are logged and reported through the outcome, never returned as errors.
    pub async fn deliver(&self, payload: &str, stream: Stream) -> DeliveryOutcome {
        if payload.is_empty() {
            return DeliveryOutcome::Skipped;
        }
        let body = match gzip(payload.as_bytes()) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!("Unable to compress payload for {}: {e}", self.url);
                return DeliveryOutcome::Dropped(e.into());
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let (started, attempt) = self.paced_post(body.clone(), stream).await;
            let last_error = match attempt {
                Attempt::Success => {
                    debug!(
                        "Post of {stream:?} stream to {} successful after {attempts} attempt(s) in {} ms",
                        self.url,
                        started.elapsed().as_millis()
                    );
                    return DeliveryOutcome::Delivered { attempts };
                }
                Attempt::Terminal(status) => {
                    warn!(
                        "Endpoint {} answered {status}, dropping the {stream:?} stream without retry",
                        self.url
                    );
                    return DeliveryOutcome::Unretried { status };
                }
                Attempt::Failed(e) => e,
            };

            if attempts > self.retry.max_retries {
                error!(
                    "Not able to post to {} after {attempts} attempts, retries exhausted: {last_error}",
                    self.url
                );
                return DeliveryOutcome::RetriesExhausted {
                    attempts,
                    last_error,
                };
            }
            info!(
                "Endpoint dropped the post ({last_error}), retrying in {} ms",
                self.retry.interval.as_millis()
            );
            tokio::time::sleep(self.retry.interval).await;
        }
    }

    async fn post(&self, body: Bytes, stream: Stream) -> Attempt {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body);
        if stream == Stream::Metric {
            request = request.header(CONTENT_TYPE, CARBON2_CONTENT_TYPE);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::OK || status == StatusCode::FOUND {
                    Attempt::Success
                } else if status.as_u16() >= 500 && self.server_errors == ServerErrorPolicy::Terminal
                {
                    Attempt::Terminal(status)
                } else {
                    Attempt::Failed(DeliveryError::Rejected(status))
                }
            }
            Err(e) => Attempt::Failed(e.into()),
        }
    }

    /// Posts once the minimum delay since the last successful post has passed. Concurrent
    /// deliveries queue on the pacing lock, so each one waits for the post before it.
    async fn paced_post(&self, body: Bytes, stream: Stream) -> (Instant, Attempt) {
        if self.min_post_delay.is_zero() {
            let started = Instant::now();
            let attempt = self.post(body, stream).await;
            if matches!(attempt, Attempt::Success) {
                *self.last_post.lock().await = Some(started);
            }
            return (started, attempt);
        }

        let mut last_post = self.last_post.lock().await;
        if let Some(previous) = *last_post {
            let ready_at = previous + self.min_post_delay;
            if ready_at > Instant::now() {
                trace!("Delaying post because minimum post delay has not expired");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let started = Instant::now();
        let attempt = self.post(body, stream).await;
        if matches!(attempt, Attempt::Success) {
            *last_post = Some(started);
        }
        (started, attempt)
    }
}

fn build_headers(endpoint: &EndpointConfig) -> Result<HeaderMap, ConfigurationError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    insert_header(
        &mut headers,
        SUMO_CLIENT_HEADER,
        &format!("{CLIENT_NAME} v{CLIENT_VERSION}"),
    )?;
    for (name, value) in [
        (SUMO_NAME_HEADER, &endpoint.name),
        (SUMO_HOST_HEADER, &endpoint.host),
        (SUMO_CATEGORY_HEADER, &endpoint.category),
    ] {
        if !value.is_empty() {
            insert_header(&mut headers, name, value)?;
        }
    }
    Ok(headers)
}

fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), ConfigurationError> {
    let value = HeaderValue::from_str(value).map_err(|e| {
        ConfigurationError::InvalidSetting(format!("invalid value for header {name}: {e}"))
    })?;
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
        ConfigurationError::InvalidSetting(format!("invalid header name {name}: {e}"))
    })?;
    headers.insert(name, value);
    Ok(())
}

fn gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}
