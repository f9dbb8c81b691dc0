// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-kind rendering of events into log records and carbon2 metric lines.

use std::fmt::Write as _;

use chrono::DateTime;
use tracing::debug;

use crate::appender::filter::ContentFilter;
use crate::event::{Event, EventKind, FieldValue};

/// Fields kept on a `LogMessage` record when verbose log messages are turned off.
const LOG_MESSAGE_ALLOW_LIST: [&str; 7] = [
    "timestamp",
    "cf_app_id",
    "deployment",
    "job_index",
    "job",
    "ip",
    "origin",
];

const CONTAINER_METRICS: [&str; 5] = [
    "cpu_percentage",
    "disk_bytes",
    "disk_bytes_quota",
    "memory_bytes",
    "memory_bytes_quota",
];

const CONTAINER_TAGS: [&str; 7] = [
    "cf_org_name",
    "cf_org_id",
    "cf_space_name",
    "cf_space_id",
    "cf_app_name",
    "cf_app_id",
    "instance_index",
];

/// Smallest and largest 19 digit nanosecond epochs.
const NANOS_19_DIGITS: std::ops::RangeInclusive<i64> = 1_000_000_000_000_000_000..=i64::MAX;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Log,
    Metric,
}

impl Stream {
    #[must_use]
    pub fn for_kind(kind: EventKind) -> Self {
        if kind.is_metric() {
            Stream::Metric
        } else {
            Stream::Log
        }
    }
}

/// Newline-terminated lines that passed the content filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedEvent {
    pub stream: Stream,
    pub text: String,
    pub records: usize,
}

/// Rewrites a nanosecond epoch field in place.
///
/// Text is kept as is. A 19 digit integer becomes a date string, or whole seconds on metric
/// kinds. Any other value is cleared to empty text. A missing field stays missing.
pub fn normalize_timestamp(event: &mut Event, field: &str) {
    let metric = event.kind.is_metric();
    let Some(value) = event.fields.get_mut(field) else {
        return;
    };
    if value.as_text().is_some() {
        return;
    }
    let normalized = match value.as_integer() {
        Some(nanos) if NANOS_19_DIGITS.contains(&nanos) => {
            if metric {
                FieldValue::Integer(nanos / 1_000_000_000)
            } else {
                FieldValue::Text(format_timestamp(nanos))
            }
        }
        _ => FieldValue::empty(),
    };
    *value = normalized;
}

/// UTC date string with the sub-second part trimmed of trailing zeros, and left out when zero.
#[must_use]
pub fn format_timestamp(nanos: i64) -> String {
    let mut formatted = DateTime::from_timestamp_nanos(nanos)
        .format(TIMESTAMP_FORMAT)
        .to_string();
    let fraction = nanos.rem_euclid(1_000_000_000);
    if fraction != 0 {
        let digits = format!("{fraction:09}");
        formatted.push('.');
        formatted.push_str(digits.trim_end_matches('0'));
    }
    formatted.push_str(" +0000 UTC");
    formatted
}

#[derive(Clone, Debug, Default)]
pub struct EventFormatter {
    verbose: bool,
    custom_metadata: Vec<(String, String)>,
    filter: ContentFilter,
}

impl EventFormatter {
    #[must_use]
    pub fn new(verbose: bool, custom_metadata: Vec<(String, String)>, filter: ContentFilter) -> Self {
        EventFormatter {
            verbose,
            custom_metadata,
            filter,
        }
    }

    #[must_use]
    pub fn format(&self, mut event: Event) -> FormattedEvent {
        for (key, value) in &self.custom_metadata {
            event.set_field(key, value.as_str());
        }

        let stream = Stream::for_kind(event.kind);
        let rendered = match event.kind {
            EventKind::HttpStart | EventKind::HttpStop | EventKind::Error => {
                normalize_timestamp(&mut event, "timestamp");
                to_json(&event)
            }
            EventKind::HttpStartStop => {
                normalize_timestamp(&mut event, "start_timestamp");
                normalize_timestamp(&mut event, "stop_timestamp");
                to_json(&event)
            }
            EventKind::LogMessage => {
                normalize_timestamp(&mut event, "timestamp");
                if self.verbose {
                    to_json(&event)
                } else {
                    to_json(&self.trim_log_message(event))
                }
            }
            EventKind::ValueMetric => {
                normalize_timestamp(&mut event, "timestamp");
                self.value_metric_line(&event)
            }
            EventKind::CounterEvent => {
                normalize_timestamp(&mut event, "timestamp");
                self.counter_lines(&event)
            }
            EventKind::ContainerMetric => {
                normalize_timestamp(&mut event, "timestamp");
                self.container_lines(&event)
            }
        };

        let mut text = String::with_capacity(rendered.len() + 1);
        let mut records = 0;
        for line in rendered.split('\n') {
            if line.is_empty() || !self.filter.wants(line) {
                continue;
            }
            text.push_str(line);
            text.push('\n');
            records += 1;
        }
        FormattedEvent {
            stream,
            text,
            records,
        }
    }

    fn trim_log_message(&self, event: Event) -> Event {
        let mut trimmed = Event::new(event.kind, event.msg);
        let custom_keys = self.custom_metadata.iter().map(|(key, _)| key.as_str());
        for key in LOG_MESSAGE_ALLOW_LIST.into_iter().chain(custom_keys) {
            if let Some(value) = event.fields.get(key) {
                trimmed.set_field(key, value.clone());
            }
        }
        trimmed
    }

    // Carbon2 meta tags: unit first, then custom metadata, each followed by a space.
    fn meta_tags(&self, unit: Option<&FieldValue>) -> String {
        let mut meta = String::new();
        if let Some(unit) = unit.filter(|unit| !unit.is_empty()) {
            let _ = write!(meta, "unit={unit} ");
        }
        for (key, value) in &self.custom_metadata {
            let _ = write!(meta, "{key}={value} ");
        }
        meta
    }

    fn value_metric_line(&self, event: &Event) -> String {
        format!(
            "{} metric={}  {}{} {}",
            intrinsic_tags(event),
            text_field(event, "name"),
            self.meta_tags(event.field("unit")),
            metric_value(event.field("value")),
            text_field(event, "timestamp"),
        )
    }

    fn counter_lines(&self, event: &Event) -> String {
        let tags = intrinsic_tags(event);
        let name = text_field(event, "name");
        let meta = self.meta_tags(None);
        let timestamp = text_field(event, "timestamp");
        ["total", "delta"]
            .iter()
            .map(|suffix| {
                format!(
                    "{tags} metric={name}_{suffix}  {meta}{} {timestamp}",
                    metric_value(event.field(suffix)),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn container_lines(&self, event: &Event) -> String {
        let mut tags = intrinsic_tags(event);
        for tag in CONTAINER_TAGS {
            let _ = write!(tags, " {tag}={}", text_field(event, tag));
        }
        let meta = self.meta_tags(None);
        let timestamp = text_field(event, "timestamp");
        CONTAINER_METRICS
            .iter()
            .map(|metric| {
                format!(
                    "{tags} metric={metric}  {meta}{} {timestamp}",
                    metric_value(event.field(metric)),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn to_json(event: &Event) -> String {
    match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            debug!("Dropping {} event that failed to serialize: {e}", event.kind);
            String::new()
        }
    }
}

fn text_field(event: &Event, key: &str) -> String {
    event.field(key).map(ToString::to_string).unwrap_or_default()
}

fn metric_value(value: Option<&FieldValue>) -> String {
    match value {
        Some(value) => value
            .as_float()
            .map_or_else(|| value.to_string(), |v| format!("{v:.6}")),
        None => String::new(),
    }
}

// deployment, job_index, ip (only when set), job and origin.
fn intrinsic_tags(event: &Event) -> String {
    let ip = event
        .field("ip")
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!(" ip={ip}"))
        .unwrap_or_default();
    format!(
        "deployment={} job_index={}{ip} job={} origin={}",
        text_field(event, "deployment"),
        text_field(event, "job_index"),
        text_field(event, "job"),
        text_field(event, "origin"),
    )
}
