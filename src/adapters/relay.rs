//! Streams a prepared turn to the client as server-sent events.
//!
//! Frames: `token` `{text}` per delta, then exactly one of `done`
//! `{done:true, custom_button?}` or `error` `{error}`. Axum's keep-alive
//! writes a comment frame on the heartbeat interval until the event stream
//! ends. When the client goes away the turn is dropped mid-flight, which
//! aborts the upstream completion request. A panic inside the turn still
//! ends the stream with an `error` frame.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::error::ChatError;
use crate::llm::DeltaSink;
use crate::orchestrator::{Orchestrator, PreparedTurn};

const CHANNEL_CAPACITY: usize = 64;

pub fn token_event(text: &str) -> Event {
    Event::default()
        .event("token")
        .data(json!({ "text": text }).to_string())
}

pub fn done_event(custom_button: Option<&serde_json::Value>) -> Event {
    let mut payload = json!({ "done": true });
    if let Some(button) = custom_button {
        payload["custom_button"] = button.clone();
    }
    Event::default().event("done").data(payload.to_string())
}

pub fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

/// Forwards model deltas onto the SSE channel.
pub struct SseRelay {
    tx: mpsc::Sender<Event>,
}

impl SseRelay {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl DeltaSink for SseRelay {
    async fn push_delta(&self, text: &str) {
        if text.is_empty() || self.tx.is_closed() {
            return;
        }
        // A send error means the client is gone; the turn is cancelled elsewhere.
        let _ = self.tx.send(token_event(text)).await;
    }
}

/// Spawns the rest of the turn and returns the event stream for it.
pub fn stream_turn(
    orchestrator: Arc<Orchestrator>,
    turn: PreparedTurn,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(
        async move {
            let relay = SseRelay::new(tx.clone());
            let sink: &dyn DeltaSink = &relay;
            tokio::select! {
                outcome = AssertUnwindSafe(orchestrator.complete(turn, Some(sink))).catch_unwind() => {
                    let event = match outcome {
                        Ok(Ok(outcome)) => done_event(outcome.custom_button.as_ref()),
                        Ok(Err(err)) => {
                            tracing::warn!(status = %err.status(), error = %err, "turn failed after stream start");
                            error_event(&err.public_message())
                        }
                        Err(_) => {
                            tracing::error!("turn panicked after stream start");
                            error_event(&ChatError::Internal("turn panicked".to_string()).public_message())
                        }
                    };
                    let _ = tx.send(event).await;
                }
                _ = tx.closed() => {
                    tracing::info!("client disconnected, cancelling turn");
                }
            }
        }
        .in_current_span(),
    );

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat))
}
