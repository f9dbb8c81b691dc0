// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-endpoint worker draining an [`EventQueue`](crate::queue::EventQueue) into Sumo Logic.
//!
//! ```text
//!   EventQueue
//!       │ pop
//!       v
//!   ┌─────────────┐
//!   │   Format    │ (JSON records / carbon2 lines, content filter)
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │    Batch    │ (flush on size or idle time)
//!   └──────┬──────┘
//!          │ spawn, one task per stream
//!          v
//!   ┌─────────────┐
//!   │ gzip + POST │ (pacing, bounded retry)
//!   └─────────────┘
//! ```

pub mod filter;
pub mod format;
pub mod sender;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::{EndpointConfig, NozzleConfig};
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_IDLE_FLUSH_INTERVAL, EMPTY_QUEUE_BACKOFF, QUEUE_REPORT_INTERVAL,
};
use crate::errors::ConfigurationError;
use crate::event::Event;
use crate::queue::{EventHandle, SharedQueue};
use format::{EventFormatter, FormattedEvent, Stream};
use sender::{DeliveryOutcome, RetryPolicy, ServerErrorPolicy, SumoSender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSettings {
    /// Records that close a batch
    pub batch_size: usize,
    /// Age after which a non-empty batch is flushed regardless of its size
    pub idle_flush_interval: Duration,
    pub empty_queue_backoff: Duration,
    pub queue_report_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_flush_interval: DEFAULT_IDLE_FLUSH_INTERVAL,
            empty_queue_backoff: EMPTY_QUEUE_BACKOFF,
            queue_report_interval: QUEUE_REPORT_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct Batch {
    logs: String,
    metrics: String,
    records: usize,
    /// Time of the first record, `None` while empty.
    opened_at: Option<Instant>,
}

impl Batch {
    fn append(&mut self, formatted: FormattedEvent) {
        if formatted.records == 0 {
            return;
        }
        match formatted.stream {
            Stream::Log => self.logs.push_str(&formatted.text),
            Stream::Metric => self.metrics.push_str(&formatted.text),
        }
        self.records += formatted.records;
        self.opened_at.get_or_insert_with(Instant::now);
    }

    fn is_empty(&self) -> bool {
        self.records == 0
    }

    fn idle_for(&self, interval: Duration) -> bool {
        self.opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= interval)
    }
}

pub struct Appender {
    queue: SharedQueue,
    formatter: EventFormatter,
    sender: Arc<SumoSender>,
    settings: BatchSettings,
}

impl Appender {
    #[must_use]
    pub fn new(
        queue: SharedQueue,
        formatter: EventFormatter,
        sender: SumoSender,
        settings: BatchSettings,
    ) -> Self {
        Appender {
            queue,
            formatter,
            sender: Arc::new(sender),
            settings,
        }
    }

    /// Builds the appender of one configured endpoint.
    pub fn for_endpoint(
        endpoint: &EndpointConfig,
        config: &NozzleConfig,
        queue: SharedQueue,
    ) -> Result<Self, ConfigurationError> {
        let formatter = EventFormatter::new(
            config.verbose_log_messages,
            endpoint.custom_metadata()?,
            endpoint.content_filter()?,
        );
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            ..Default::default()
        };
        let server_errors = if config.retry_server_errors {
            ServerErrorPolicy::Retry
        } else {
            ServerErrorPolicy::Terminal
        };
        let sender = SumoSender::new(endpoint, retry, server_errors)?;
        let settings = BatchSettings {
            batch_size: config.batch_size,
            idle_flush_interval: config.idle_flush_interval,
            ..Default::default()
        };
        Ok(Self::new(queue, formatter, sender, settings))
    }

    /// Drains the queue until cancelled. The open batch is flushed and in-flight deliveries
    /// are awaited before returning.
    pub async fn run(self, cancel_token: CancellationToken) {
        info!("Starting appender for {}", self.sender.url());
        let mut batch = Batch::default();
        let mut deliveries = JoinSet::new();
        let mut last_report = Instant::now();

        while !cancel_token.is_cancelled() {
            if last_report.elapsed() >= self.settings.queue_report_interval {
                info!("Log queue size: {}", self.queue_len());
                last_report = Instant::now();
            }
            while let Some(result) = deliveries.try_join_next() {
                log_delivery(result);
            }

            if batch.idle_for(self.settings.idle_flush_interval) {
                info!(
                    "Sending batch after idle timer exceeded, records: {}",
                    batch.records
                );
                self.flush(&mut batch, &mut deliveries);
                continue;
            }

            let popped = self.drain_into(&mut batch);
            if batch.records >= self.settings.batch_size {
                debug!("Sending full batch, records: {}", batch.records);
                self.flush(&mut batch, &mut deliveries);
                tokio::task::yield_now().await;
                continue;
            }

            if popped == 0 {
                trace!(
                    "Queue empty, waiting for {} ms",
                    self.settings.empty_queue_backoff.as_millis()
                );
                tokio::select! {
                    () = tokio::time::sleep(self.settings.empty_queue_backoff) => {}
                    () = cancel_token.cancelled() => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        if !batch.is_empty() {
            info!("Sending open batch on shutdown, records: {}", batch.records);
            self.flush(&mut batch, &mut deliveries);
        }
        while let Some(result) = deliveries.join_next().await {
            log_delivery(result);
        }
        info!("Appender for {} stopped", self.sender.url());
    }

    #[allow(clippy::expect_used)]
    fn queue_len(&self) -> usize {
        self.queue.lock().expect("lock poisoned").count()
    }

    /// Pops at most the room left in the batch, then formats outside of the queue lock.
    /// Returns the number of events popped.
    fn drain_into(&self, batch: &mut Batch) -> usize {
        let room = self.settings.batch_size.saturating_sub(batch.records);
        let popped: Vec<EventHandle> = {
            #[allow(clippy::expect_used)]
            let mut queue = self.queue.lock().expect("lock poisoned");
            std::iter::from_fn(|| queue.pop()).take(room).collect()
        };
        let count = popped.len();
        for handle in popped {
            // the same handle may sit in other endpoint queues
            let event = Arc::try_unwrap(handle).unwrap_or_else(|shared| Event::clone(&shared));
            batch.append(self.formatter.format(event));
        }
        count
    }

    fn flush(&self, batch: &mut Batch, deliveries: &mut JoinSet<DeliveryOutcome>) {
        let full = std::mem::take(batch);
        for (payload, stream) in [(full.logs, Stream::Log), (full.metrics, Stream::Metric)] {
            if payload.is_empty() {
                continue;
            }
            let sender = Arc::clone(&self.sender);
            deliveries.spawn(async move { sender.deliver(&payload, stream).await });
        }
    }
}

fn log_delivery(result: Result<DeliveryOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => trace!("Delivery finished: {outcome:?}"),
        Err(e) => error!("Delivery task failed: {e}"),
    }
}
