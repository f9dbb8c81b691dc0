// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use mockito::{Matcher, Mock, Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;
use sumo_nozzle::{
    appender::Appender,
    config::{EndpointConfig, NozzleConfig},
    constants::{CARBON2_CONTENT_TYPE, CLIENT_VERSION, IGNORED_APP_COUNTER},
    event::{Envelope, EnvelopeEvent, LogMessage, ValueMetric},
    firehose::FirehoseNozzle,
    metadata::InMemoryMetadataCache,
    queue::shared_queue,
    routing::EventRouter,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn log_envelope(app_id: &str, message: &str) -> Envelope {
    let mut envelope = Envelope::new(
        "rep",
        EnvelopeEvent::LogMessage(LogMessage {
            message: message.to_string(),
            message_type: "OUT".to_string(),
            timestamp: 1_483_629_662_001_580_713,
            app_id: Some(app_id.to_string()),
            source_type: "APP".to_string(),
            source_instance: "0".to_string(),
        }),
    );
    envelope.deployment = "cf".to_string();
    envelope.job = "diego_cell".to_string();
    envelope.index = "c62aebe5".to_string();
    envelope.ip = "10.193.166.47".to_string();
    envelope
}

fn metric_envelope() -> Envelope {
    let mut envelope = Envelope::new(
        "cc",
        EnvelopeEvent::ValueMetric(ValueMetric {
            name: "requests.completed".to_string(),
            value: 558_108.0,
            unit: "counter".to_string(),
        }),
    );
    envelope.timestamp = Some(1_483_629_662_001_580_569);
    envelope
}

async fn mock_streams(server: &mut ServerGuard) -> (Mock, Mock) {
    let client = format!("cloudfoundry-sumologic-nozzle v{CLIENT_VERSION}");
    let logs = server
        .mock("POST", "/")
        .match_header("content-encoding", "gzip")
        .match_header("x-sumo-client", client.as_str())
        .match_header("content-type", Matcher::Missing)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/")
        .match_header("content-encoding", "gzip")
        .match_header("content-type", CARBON2_CONTENT_TYPE)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    (logs, metrics)
}

async fn wait_until_matched(mocks: &[&Mock]) {
    timeout(Duration::from_secs(3), async {
        for mock in mocks {
            while !mock.matched_async().await {
                sleep(Duration::from_millis(20)).await;
            }
        }
    })
    .await
    .expect("timed out before every endpoint received its batches");
}

#[tokio::test]
async fn firehose_events_reach_every_endpoint() {
    let mut first = Server::new_async().await;
    let mut second = Server::new_async().await;
    let (first_logs, first_metrics) = mock_streams(&mut first).await;
    let (second_logs, second_metrics) = mock_streams(&mut second).await;

    let config = NozzleConfig {
        endpoints: vec![
            EndpointConfig::new(&first.url()),
            EndpointConfig {
                custom_metadata: "env:prod".to_string(),
                ..EndpointConfig::new(&second.url())
            },
        ],
        events: "LogMessage,ValueMetric".to_string(),
        batch_size: 3,
        verbose_log_messages: false,
        ..Default::default()
    };
    config.validate().expect("valid configuration");

    let cancel_token = CancellationToken::new();
    let mut queues = Vec::new();
    let mut appenders = Vec::new();
    for endpoint in &config.endpoints {
        let queue = shared_queue(2);
        let appender = Appender::for_endpoint(endpoint, &config, Arc::clone(&queue))
            .expect("failed to create appender");
        appenders.push(tokio::spawn(appender.run(cancel_token.clone())));
        queues.push(queue);
    }

    let cache = Arc::new(InMemoryMetadataCache::default());
    cache.ignore("noisy-app");
    let mut router = EventRouter::new(cache, queues);
    router
        .configure(&config.events)
        .expect("failed to configure routing");
    let router = Arc::new(router);

    let (message_tx, message_rx) = mpsc::channel(16);
    let (_error_tx, error_rx) = mpsc::channel(1);
    let nozzle = FirehoseNozzle::new(Arc::clone(&router), message_rx, error_rx);

    message_tx
        .send(log_envelope("7833dc75", "Triggering 'app usage events fetcher'"))
        .await
        .unwrap();
    message_tx
        .send(log_envelope("noisy-app", "should never ship"))
        .await
        .unwrap();
    message_tx.send(log_envelope("7833dc75", "second")).await.unwrap();
    message_tx.send(metric_envelope()).await.unwrap();
    drop(message_tx);
    nozzle
        .run(cancel_token.clone())
        .await
        .expect("transport should close cleanly");

    let counts = router.counts();
    assert_eq!(counts.get("LogMessage"), Some(&2));
    assert_eq!(counts.get("ValueMetric"), Some(&1));
    assert_eq!(counts.get(IGNORED_APP_COUNTER), Some(&1));

    wait_until_matched(&[&first_logs, &first_metrics, &second_logs, &second_metrics]).await;

    cancel_token.cancel();
    for appender in appenders {
        appender.await.unwrap();
    }
    first_logs.assert_async().await;
    first_metrics.assert_async().await;
    second_logs.assert_async().await;
    second_metrics.assert_async().await;
}

#[tokio::test]
async fn failed_delivery_does_not_stop_the_appender() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/")
        .match_header("content-type", Matcher::Missing)
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/")
        .match_header("content-type", CARBON2_CONTENT_TYPE)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = NozzleConfig {
        endpoints: vec![EndpointConfig::new(&server.url())],
        events: "LogMessage,ValueMetric".to_string(),
        batch_size: 1,
        ..Default::default()
    };
    let queue = shared_queue(2);
    let appender = Appender::for_endpoint(&config.endpoints[0], &config, Arc::clone(&queue))
        .expect("failed to create appender");
    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(appender.run(cancel_token.clone()));

    let mut router = EventRouter::new(Arc::new(InMemoryMetadataCache::default()), vec![queue]);
    router.configure(&config.events).unwrap();
    router.route_event(&log_envelope("7833dc75", "rejected by the collector"));
    wait_until_matched(&[&rejected]).await;
    router.route_event(&metric_envelope());
    wait_until_matched(&[&accepted]).await;

    cancel_token.cancel();
    task.await.unwrap();
    rejected.assert_async().await;
    accepted.assert_async().await;
}
