// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Firehose envelopes and the normalized events derived from them.
//!
//! An [`Envelope`] is what the transport hands over: common origin data plus one
//! kind-specific payload. [`Envelope::normalize`] turns it into an [`Event`], a flat map of
//! named [`FieldValue`]s that the appender knows how to format.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::metadata::AppMetadataSource;

pub const APP_ID_FIELD: &str = "cf_app_id";

/// The eight categories of firehose events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    HttpStart,
    HttpStop,
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Error,
    ContainerMetric,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::HttpStart,
        EventKind::HttpStop,
        EventKind::HttpStartStop,
        EventKind::LogMessage,
        EventKind::ValueMetric,
        EventKind::CounterEvent,
        EventKind::Error,
        EventKind::ContainerMetric,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::HttpStart => "HttpStart",
            EventKind::HttpStop => "HttpStop",
            EventKind::HttpStartStop => "HttpStartStop",
            EventKind::LogMessage => "LogMessage",
            EventKind::ValueMetric => "ValueMetric",
            EventKind::CounterEvent => "CounterEvent",
            EventKind::Error => "Error",
            EventKind::ContainerMetric => "ContainerMetric",
        }
    }

    /// Metric kinds go to the carbon2 stream, everything else to the log stream.
    #[must_use]
    pub fn is_metric(self) -> bool {
        matches!(
            self,
            EventKind::ValueMetric | EventKind::CounterEvent | EventKind::ContainerMetric
        )
    }

    /// Sorted, comma separated list of every kind name, used in configuration errors.
    #[must_use]
    pub fn valid_names() -> String {
        let mut names: Vec<&str> = Self::ALL.iter().map(|kind| kind.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ();

    /// Case-sensitive match on the kind name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// Value of a single event field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// True for empty text. Numbers are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.is_empty())
    }

    #[must_use]
    pub fn empty() -> Self {
        FieldValue::Text(String::new())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// A normalized firehose event.
///
/// Serializes as `{"Fields":{..},"Msg":"..","Type":".."}` with fields in key order, which is the
/// record layout Sumo Logic searches are written against.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "Fields")]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(rename = "Msg")]
    pub msg: String,
    #[serde(rename = "Type")]
    pub kind: EventKind,
    /// Set when the event belongs to an application that must not be shipped.
    #[serde(skip)]
    pub ignored: bool,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, msg: impl Into<String>) -> Self {
        Event {
            fields: BTreeMap::new(),
            msg: msg.into(),
            kind,
            ignored: false,
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.set_field(key, value);
        self
    }

    pub fn set_field(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.field(APP_ID_FIELD).and_then(FieldValue::as_text)
    }

    /// Copies the origin data every envelope carries onto the event.
    pub fn annotate_with_envelope(&mut self, envelope: &Envelope) {
        self.set_field("origin", envelope.origin.as_str());
        self.set_field("deployment", envelope.deployment.as_str());
        self.set_field("job", envelope.job.as_str());
        self.set_field("job_index", envelope.index.as_str());
        self.set_field("ip", envelope.ip.as_str());
        for (key, value) in &envelope.tags {
            self.set_field(key, value.as_str());
        }
        if let Some(timestamp) = envelope.timestamp {
            self.fields
                .entry("timestamp".to_string())
                .or_insert(FieldValue::Integer(timestamp));
        }
    }

    /// Adds application, space and org names for the event's `cf_app_id`, and marks the
    /// event as ignored when the source says so.
    pub fn annotate_with_app_data(&mut self, source: &dyn AppMetadataSource) {
        let Some(app_id) = self.app_id().map(str::to_string) else {
            return;
        };
        if let Some(app) = source.lookup(&app_id) {
            self.set_field("cf_app_name", app.name);
            self.set_field("cf_space_id", app.space_id);
            self.set_field("cf_space_name", app.space_name);
            self.set_field("cf_org_id", app.org_id);
            self.set_field("cf_org_name", app.org_name);
        }
        self.ignored = source.is_ignored(&app_id);
    }
}

/// A raw message from the firehose.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub origin: String,
    /// Nanoseconds since the epoch.
    pub timestamp: Option<i64>,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    pub tags: BTreeMap<String, String>,
    pub event: EnvelopeEvent,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "event_type")]
pub enum EnvelopeEvent {
    HttpStart(HttpStart),
    HttpStop(HttpStop),
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(ErrorPayload),
    ContainerMetric(ContainerMetric),
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpStart {
    pub timestamp: i64,
    pub request_id: String,
    pub peer_type: String,
    pub method: String,
    pub uri: String,
    pub remote_address: String,
    pub user_agent: String,
    pub parent_request_id: String,
    pub application_id: Option<String>,
    pub instance_index: i32,
    pub instance_id: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpStop {
    pub timestamp: i64,
    pub uri: String,
    pub request_id: String,
    pub peer_type: String,
    pub status_code: i32,
    pub content_length: i64,
    pub application_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub request_id: String,
    pub peer_type: String,
    pub method: String,
    pub uri: String,
    pub remote_address: String,
    pub user_agent: String,
    pub status_code: i32,
    pub content_length: i64,
    pub application_id: Option<String>,
    pub instance_index: i32,
    pub instance_id: String,
    pub forwarded: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogMessage {
    pub message: String,
    pub message_type: String,
    pub timestamp: i64,
    pub app_id: Option<String>,
    pub source_type: String,
    pub source_instance: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub source: String,
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContainerMetric {
    pub application_id: String,
    pub instance_index: i32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_bytes_quota: u64,
    pub disk_bytes_quota: u64,
}

impl Envelope {
    #[must_use]
    pub fn new(origin: &str, event: EnvelopeEvent) -> Self {
        Envelope {
            origin: origin.to_string(),
            event,
            ..Default::default()
        }
    }

    /// `None` for payloads this nozzle does not know about.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self.event {
            EnvelopeEvent::HttpStart(_) => Some(EventKind::HttpStart),
            EnvelopeEvent::HttpStop(_) => Some(EventKind::HttpStop),
            EnvelopeEvent::HttpStartStop(_) => Some(EventKind::HttpStartStop),
            EnvelopeEvent::LogMessage(_) => Some(EventKind::LogMessage),
            EnvelopeEvent::ValueMetric(_) => Some(EventKind::ValueMetric),
            EnvelopeEvent::CounterEvent(_) => Some(EventKind::CounterEvent),
            EnvelopeEvent::Error(_) => Some(EventKind::Error),
            EnvelopeEvent::ContainerMetric(_) => Some(EventKind::ContainerMetric),
            EnvelopeEvent::Unknown => None,
        }
    }

    /// Maps the kind-specific payload to an event. Envelope data is not applied here, see
    /// [`Event::annotate_with_envelope`].
    #[must_use]
    pub fn normalize(&self) -> Option<Event> {
        let event = match &self.event {
            EnvelopeEvent::HttpStart(p) => {
                let mut event = Event::new(EventKind::HttpStart, "")
                    .with_field("timestamp", p.timestamp)
                    .with_field("request_id", p.request_id.as_str())
                    .with_field("method", p.method.as_str())
                    .with_field("uri", p.uri.as_str())
                    .with_field("remote_addr", p.remote_address.as_str())
                    .with_field("user_agent", p.user_agent.as_str())
                    .with_field("parent_request_id", p.parent_request_id.as_str())
                    .with_field("peer_type", p.peer_type.as_str())
                    .with_field("instance_index", p.instance_index)
                    .with_field("instance_id", p.instance_id.as_str());
                set_app_id(&mut event, p.application_id.as_deref());
                event
            }
            EnvelopeEvent::HttpStop(p) => {
                let mut event = Event::new(EventKind::HttpStop, "")
                    .with_field("timestamp", p.timestamp)
                    .with_field("uri", p.uri.as_str())
                    .with_field("request_id", p.request_id.as_str())
                    .with_field("peer_type", p.peer_type.as_str())
                    .with_field("status_code", p.status_code)
                    .with_field("content_length", p.content_length);
                set_app_id(&mut event, p.application_id.as_deref());
                event
            }
            EnvelopeEvent::HttpStartStop(p) => {
                let mut event = Event::new(EventKind::HttpStartStop, "")
                    .with_field("start_timestamp", p.start_timestamp)
                    .with_field("stop_timestamp", p.stop_timestamp)
                    .with_field("request_id", p.request_id.as_str())
                    .with_field("method", p.method.as_str())
                    .with_field("uri", p.uri.as_str())
                    .with_field("remote_addr", p.remote_address.as_str())
                    .with_field("user_agent", p.user_agent.as_str())
                    .with_field("status_code", p.status_code)
                    .with_field("content_length", p.content_length)
                    .with_field("peer_type", p.peer_type.as_str())
                    .with_field("instance_index", p.instance_index)
                    .with_field("instance_id", p.instance_id.as_str())
                    .with_field(
                        "duration_ms",
                        p.stop_timestamp.saturating_sub(p.start_timestamp) / 1_000_000,
                    );
                if !p.forwarded.is_empty() {
                    event.set_field("forwarded", p.forwarded.join(","));
                }
                set_app_id(&mut event, p.application_id.as_deref());
                event
            }
            EnvelopeEvent::LogMessage(p) => {
                let mut event = Event::new(EventKind::LogMessage, p.message.as_str())
                    .with_field("timestamp", p.timestamp)
                    .with_field("source_type", p.source_type.as_str())
                    .with_field("message_type", p.message_type.as_str())
                    .with_field("source_instance", p.source_instance.as_str());
                set_app_id(&mut event, p.app_id.as_deref());
                event
            }
            EnvelopeEvent::ValueMetric(p) => Event::new(EventKind::ValueMetric, "")
                .with_field("name", p.name.as_str())
                .with_field("value", p.value)
                .with_field("unit", p.unit.as_str()),
            EnvelopeEvent::CounterEvent(p) => Event::new(EventKind::CounterEvent, "")
                .with_field("name", p.name.as_str())
                .with_field("delta", p.delta)
                .with_field("total", p.total),
            EnvelopeEvent::Error(p) => Event::new(EventKind::Error, p.message.as_str())
                .with_field("source", p.source.as_str())
                .with_field("code", p.code),
            EnvelopeEvent::ContainerMetric(p) => {
                let mut event = Event::new(EventKind::ContainerMetric, "")
                    .with_field("instance_index", p.instance_index)
                    .with_field("cpu_percentage", p.cpu_percentage)
                    .with_field("memory_bytes", p.memory_bytes)
                    .with_field("disk_bytes", p.disk_bytes)
                    .with_field("memory_bytes_quota", p.memory_bytes_quota)
                    .with_field("disk_bytes_quota", p.disk_bytes_quota);
                set_app_id(&mut event, Some(p.application_id.as_str()));
                event
            }
            EnvelopeEvent::Unknown => return None,
        };
        Some(event)
    }
}

fn set_app_id(event: &mut Event, app_id: Option<&str>) {
    if let Some(app_id) = app_id.filter(|id| !id.is_empty()) {
        event.set_field(APP_ID_FIELD, app_id);
    }
}
