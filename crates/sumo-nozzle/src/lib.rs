// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Firehose-to-Sumo Logic forwarding pipeline.
//!
//! Envelopes coming off the Cloud Foundry firehose are routed by [`routing::EventRouter`],
//! which filters them by kind, annotates them and pushes them into one
//! [`queue::EventQueue`] per Sumo Logic endpoint. Each queue is drained by its own
//! [`appender::Appender`], which formats the events into a log stream (JSON records) and a
//! metric stream (carbon2 lines), batches them and ships them gzip-compressed over HTTP.
//!
//! ```text
//!   transport ──> EventRouter ──> EventQueue (per endpoint) ──> Appender ──> Sumo Logic
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event;
pub mod firehose;
pub mod metadata;
pub mod queue;
pub mod routing;
