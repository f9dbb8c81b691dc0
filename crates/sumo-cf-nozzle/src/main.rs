// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use sumo_nozzle::{
    appender::Appender,
    config::NozzleConfig,
    constants::{CLIENT_VERSION, INITIAL_QUEUE_CAPACITY},
    event::Envelope,
    firehose::{FirehoseNozzle, TransportError},
    metadata::{metadata_needed, AppMetadataSource, EmptyMetadataCache, InMemoryMetadataCache},
    queue::shared_queue,
    routing::{log_event_totals, parse_event_kinds, EventRouter},
};

const ENVELOPE_CHANNEL_SIZE: usize = 1024;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match NozzleConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error parsing nozzle configuration: {e}");
            return;
        }
    };

    info!("Starting Sumo Logic Nozzle {CLIENT_VERSION}");
    info!("Events Selected: {}", config.events);
    info!("Log Events Batch Size: [{}]", config.batch_size);
    info!("Verbose Log Messages: {}", config.verbose_log_messages);

    let cancel_token = CancellationToken::new();
    let mut appenders = JoinSet::new();
    let mut queues = Vec::with_capacity(config.endpoints.len());
    for endpoint in &config.endpoints {
        info!("Creating queue for endpoint: {}", endpoint.endpoint);
        let queue = shared_queue(INITIAL_QUEUE_CAPACITY);
        let appender = match Appender::for_endpoint(endpoint, &config, Arc::clone(&queue)) {
            Ok(appender) => appender,
            Err(e) => {
                error!("Error setting up appender for {}: {e}", endpoint.endpoint);
                return;
            }
        };
        appenders.spawn(appender.run(cancel_token.child_token()));
        queues.push(queue);
    }

    let mut router = EventRouter::new(metadata_source(&config), queues);
    if let Err(e) = router.configure(&config.events) {
        error!("Error setting up event routing: {e}");
        cancel_token.cancel();
        return;
    }
    let router = Arc::new(router);

    if let Some(period) = config.event_totals_interval {
        tokio::spawn(log_event_totals(
            Arc::clone(&router),
            period,
            cancel_token.child_token(),
        ));
    }

    let (message_tx, message_rx) = mpsc::channel(ENVELOPE_CHANNEL_SIZE);
    let (error_tx, error_rx) = mpsc::channel(1);
    tokio::spawn(read_envelopes(message_tx, error_tx));

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            ctrl_c_token.cancel();
        }
    });

    let nozzle = FirehoseNozzle::new(router, message_rx, error_rx);
    if let Err(e) = nozzle.run(cancel_token.child_token()).await {
        error!("FirehoseClient Error: {e}");
    }

    cancel_token.cancel();
    while let Some(result) = appenders.join_next().await {
        if let Err(e) = result {
            error!("Appender task failed: {e}");
        }
    }
    info!("Sumo Logic Nozzle stopped");
}

fn metadata_source(config: &NozzleConfig) -> Arc<dyn AppMetadataSource> {
    let kinds = parse_event_kinds(&config.events).unwrap_or_default();
    if metadata_needed(&kinds) {
        Arc::new(InMemoryMetadataCache::default())
    } else {
        Arc::new(EmptyMetadataCache)
    }
}

/// Reads newline delimited JSON envelopes from stdin until end of input.
async fn read_envelopes(messages: Sender<Envelope>, errors: Sender<TransportError>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        if messages.send(envelope).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!("Skipping malformed envelope: {e}"),
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = errors.send(TransportError::Other(e.to_string())).await;
                return;
            }
        }
    }
}
