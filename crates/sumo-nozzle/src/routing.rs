// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classifies incoming envelopes and pushes the wanted ones into the endpoint queues.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::constants::IGNORED_APP_COUNTER;
use crate::errors::ConfigurationError;
use crate::event::{Envelope, EventKind};
use crate::metadata::AppMetadataSource;
use crate::queue::SharedQueue;

/// Parses a comma separated list of event kind names.
///
/// An empty list selects `LogMessage` only.
pub fn parse_event_kinds(wanted: &str) -> Result<BTreeSet<EventKind>, ConfigurationError> {
    let mut kinds = BTreeSet::new();
    if wanted.trim().is_empty() {
        kinds.insert(EventKind::LogMessage);
        return Ok(kinds);
    }
    for name in wanted.split(',').map(str::trim) {
        let kind = name
            .parse::<EventKind>()
            .map_err(|()| ConfigurationError::UnknownEventKind {
                name: name.to_string(),
                valid: EventKind::valid_names(),
            })?;
        kinds.insert(kind);
    }
    Ok(kinds)
}

#[derive(Debug, Default)]
struct Counters {
    by_name: BTreeMap<String, u64>,
}

impl Counters {
    fn increment(&mut self, name: &str) {
        *self.by_name.entry(name.to_string()).or_insert(0) += 1;
    }
}

pub struct EventRouter {
    metadata: Arc<dyn AppMetadataSource>,
    selected: BTreeSet<EventKind>,
    queues: Vec<SharedQueue>,
    counters: Mutex<Counters>,
}

impl EventRouter {
    /// Creates a router that fans accepted events out to every queue. Only `LogMessage`
    /// events are selected until [`EventRouter::configure`] is called.
    #[must_use]
    pub fn new(metadata: Arc<dyn AppMetadataSource>, queues: Vec<SharedQueue>) -> Self {
        EventRouter {
            metadata,
            selected: BTreeSet::from([EventKind::LogMessage]),
            queues,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Replaces the selected event kinds. On error the previous selection is kept.
    pub fn configure(&mut self, wanted: &str) -> Result<(), ConfigurationError> {
        self.selected = parse_event_kinds(wanted)?;
        for kind in &self.selected {
            debug!("Event Type [{kind}] is included in the firehose");
        }
        Ok(())
    }

    #[must_use]
    pub fn selected_kinds(&self) -> BTreeSet<EventKind> {
        self.selected.clone()
    }

    pub fn route_event(&self, envelope: &Envelope) {
        let Some(kind) = envelope.kind() else {
            trace!("Dropping envelope of unknown type from {}", envelope.origin);
            return;
        };
        if !self.selected.contains(&kind) {
            return;
        }
        let Some(mut event) = envelope.normalize() else {
            return;
        };

        event.annotate_with_envelope(envelope);
        if event.app_id().is_some() {
            event.annotate_with_app_data(self.metadata.as_ref());
        }

        #[allow(clippy::expect_used)]
        let mut counters = self.counters.lock().expect("lock poisoned");
        if event.ignored {
            counters.increment(IGNORED_APP_COUNTER);
            return;
        }
        let event = Arc::new(event);
        for queue in &self.queues {
            #[allow(clippy::expect_used)]
            queue
                .lock()
                .expect("lock poisoned")
                .push(Arc::clone(&event));
        }
        counters.increment(kind.as_str());
    }

    /// Snapshot of the per-kind counters, including the ignored bucket.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counters.lock().expect("lock poisoned").by_name.clone()
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.counts().values().sum()
    }
}

/// Periodically logs the routing counters and the event rate since the previous report.
pub async fn log_event_totals(
    router: Arc<EventRouter>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    let mut last_total = 0;
    let mut last_report = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_token.cancelled() => break,
        }
        let counts = router.counts();
        let total: u64 = counts.values().sum();
        let elapsed = last_report.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let per_sec = if elapsed > 0.0 {
            total.saturating_sub(last_total) as f64 / elapsed
        } else {
            0.0
        };
        info!("Firehose event totals: total_count={total} by_sec_events={per_sec:.1} {counts:?}");
        last_total = total;
        last_report = Instant::now();
    }
}
