//! Event stream endpoint
//!
//! GET /events opens the push channel a page holds while it runs the
//! authorization flow. The first frame names the connection, and the
//! outcome of the flow arrives on the same stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::router::AppState;
use crate::relay::NotificationRelay;

/// Open an event stream and hand out a fresh connection id
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let connection_id = format!("conn-{}", Uuid::new_v4());
    info!(connection_id = %connection_id, "Event stream opened");

    create_event_stream(
        Arc::clone(&state.relay),
        connection_id,
        state.config.relay.keep_alive_interval,
    )
}

/// Build the SSE response for one connection.
///
/// Takes owned data to satisfy Rust 2024 lifetime capture rules for
/// `impl Stream`. The connection is registered before the stream exists
/// so a callback arriving between the two cannot be lost.
fn create_event_stream(
    relay: Arc<NotificationRelay>,
    connection_id: String,
    keep_alive_interval: Duration,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = relay.register(&connection_id);
    let guard = UnregisterGuard {
        relay,
        connection_id: connection_id.clone(),
    };

    let stream = stream! {
        // Owned by the stream so disconnects unregister the channel
        let _guard = guard;

        // First frame carries the id the page sends through the flow
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "connectionId": connection_id }).to_string()));

        while let Some(message) = rx.recv().await {
            debug!(
                connection_id = %connection_id,
                event = message.event_name(),
                "Pushing event"
            );
            yield Ok(Event::default()
                .event(message.event_name())
                .data(message.payload().to_string()));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(keep_alive_interval)
            .text("ping"),
    )
}

/// Unregisters the connection when the stream is dropped
struct UnregisterGuard {
    relay: Arc<NotificationRelay>,
    connection_id: String,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        debug!(connection_id = %self.connection_id, "Event stream closed");
        self.relay.unregister(&self.connection_id);
    }
}
