// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adapter between an upstream envelope stream and the [`EventRouter`].

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::event::{Envelope, EnvelopeEvent};
use crate::routing::EventRouter;

const DROPPED_MESSAGES_COUNTER: &str = "TruncatingBuffer.DroppedMessages";
const DOPPLER_ORIGIN: &str = "doppler";

/// Failure reported by the upstream transport. Ends the consumption loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("normal closure: {0}")]
    NormalClosure(String),

    /// The upstream closed the connection because the nozzle could not keep up.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("{0}")]
    Other(String),
}

pub struct FirehoseNozzle {
    router: Arc<EventRouter>,
    messages: Receiver<Envelope>,
    errors: Receiver<TransportError>,
}

impl FirehoseNozzle {
    #[must_use]
    pub fn new(
        router: Arc<EventRouter>,
        messages: Receiver<Envelope>,
        errors: Receiver<TransportError>,
    ) -> Self {
        FirehoseNozzle {
            router,
            messages,
            errors,
        }
    }

    /// Routes envelopes until the message stream ends, the token is cancelled or the
    /// transport reports an error. The error is logged and handed back to the caller.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<(), TransportError> {
        info!("Consuming the firehose");
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("Firehose consumer cancelled");
                    return Ok(());
                }
                Some(err) = self.errors.recv() => {
                    handle_error(&err);
                    return Err(err);
                }
                message = self.messages.recv() => {
                    let Some(envelope) = message else {
                        info!("Firehose message stream closed");
                        return Ok(());
                    };
                    warn_if_falling_behind(&envelope);
                    self.router.route_event(&envelope);
                }
            }
        }
    }
}

fn handle_error(err: &TransportError) {
    match err {
        TransportError::NormalClosure(_) => error!("Normal websocket closure: {err}"),
        TransportError::PolicyViolation(_) => {
            error!("Error while reading from the firehose: {err}");
            error!("Disconnected because nozzle couldn't keep up. Please try scaling up the nozzle.");
        }
        TransportError::Other(_) => error!("Error while reading from the firehose: {err}"),
    }
    error!("Closing connection with traffic controller due to error: {err}");
}

fn warn_if_falling_behind(envelope: &Envelope) {
    if let EnvelopeEvent::CounterEvent(counter) = &envelope.event {
        if counter.name == DROPPED_MESSAGES_COUNTER && envelope.origin == DOPPLER_ORIGIN {
            warn!(
                "Intercepted an upstream message which indicates that the nozzle or the traffic controller is not keeping up. Please try scaling up the nozzle."
            );
        }
    }
}
