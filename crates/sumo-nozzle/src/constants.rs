// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Number of slots each endpoint queue starts with. Queues double when full.
pub const INITIAL_QUEUE_CAPACITY: usize = 100;

/// Default number of records that closes a batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A non-empty batch older than this is flushed regardless of its size.
pub const DEFAULT_IDLE_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// How long the appender sleeps when its queue is empty.
pub const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(300);

/// How often the appender reports the size of its queue.
pub const QUEUE_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// HTTP timeout for a single post to Sumo Logic.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Retries after the first failed post.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Pause between two posts of the same payload.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Product name sent in the `X-Sumo-Client` header.
pub const CLIENT_NAME: &str = "cloudfoundry-sumologic-nozzle";

/// Version sent in the `X-Sumo-Client` header.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CARBON2_CONTENT_TYPE: &str = "application/vnd.sumologic.carbon2";

pub const SUMO_CLIENT_HEADER: &str = "X-Sumo-Client";
pub const SUMO_NAME_HEADER: &str = "X-Sumo-Name";
pub const SUMO_HOST_HEADER: &str = "X-Sumo-Host";
pub const SUMO_CATEGORY_HEADER: &str = "X-Sumo-Category";

/// Counter bucket for events dropped because their application is ignored.
pub const IGNORED_APP_COUNTER: &str = "ignored_app_message";
