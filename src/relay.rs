//! Push delivery of authorization outcomes
//!
//! Browser pages hold a live event stream and are addressed by the
//! connection id handed out when the stream opened. The relay routes the
//! outcome of an authorization flow back to exactly the connection that
//! started it.

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::oauth::{Credential, SessionKey};

/// Outcome of an authorization flow, pushed to the waiting connection
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// The flow completed and a credential is stored under `session`
    OAuthComplete {
        /// Session key minted for the caller to use as its bearer token
        session: SessionKey,
        /// The credential that was stored
        credential: Credential,
    },
    /// The flow ended without a stored credential
    OAuthFailed {
        /// Human-readable description of what went wrong
        reason: String,
    },
}

impl RelayMessage {
    /// Event name on the wire
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::OAuthComplete { .. } => "oauth_complete",
            Self::OAuthFailed { .. } => "oauth_failed",
        }
    }

    /// JSON payload for the event.
    ///
    /// The provider access token is pushed alongside the session token so
    /// the page can call the instance directly when it prefers to.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::OAuthComplete {
                session,
                credential,
            } => json!({
                "sessionToken": session.as_str(),
                "accessToken": credential.access_token,
                "refreshToken": credential.refresh_token,
                "instanceUrl": credential.instance_url,
                "apiVersion": credential.api_version,
            }),
            Self::OAuthFailed { reason } => json!({ "reason": reason }),
        }
    }
}

/// Registry of live connections, keyed by connection id
#[derive(Debug, Default)]
pub struct NotificationRelay {
    connections: DashMap<String, mpsc::Sender<RelayMessage>>,
}

impl NotificationRelay {
    /// Create an empty relay
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its channel.
    ///
    /// Registering an id that is already present replaces the old channel,
    /// which closes the previous receiver.
    pub fn register(&self, connection_id: &str) -> mpsc::Receiver<RelayMessage> {
        // One slot is enough: a connection waits for a single outcome.
        let (tx, rx) = mpsc::channel(1);
        if self.connections.insert(connection_id.to_string(), tx).is_some() {
            debug!(connection_id, "Replaced existing connection registration");
        } else {
            debug!(connection_id, "Registered connection");
        }
        rx
    }

    /// Drop a connection's registration. Unknown ids are ignored.
    pub fn unregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!(connection_id, "Unregistered connection");
        }
    }

    /// Deliver a message to one connection.
    ///
    /// Returns whether the message was handed to a live channel. A missing
    /// or full channel drops the message; completing a flow nobody is
    /// waiting on must not fail the callback.
    pub fn deliver(&self, connection_id: &str, message: RelayMessage) -> bool {
        let Some(sender) = self.connections.get(connection_id) else {
            debug!(connection_id, "No connection waiting, dropping message");
            return false;
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(connection_id, "Connection not accepting messages: {e}");
                false
            }
        }
    }

    /// Whether a connection id is currently registered
    #[must_use]
    pub fn has_connection(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Number of registered connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
