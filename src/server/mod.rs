//! HTTP server
//!
//! Routes, state wiring, and the listen/shutdown lifecycle.

mod auth;
mod callback;
mod events;
mod proxy;
mod router;

pub use router::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::oauth::{CredentialManager, MemoryTokenStore, ProviderClient, TokenStore};
use crate::relay::NotificationRelay;
use crate::{Error, Result};

/// The relay server: one provider, one listener, in-memory sessions
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Wire up server state from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.server.request_timeout)
            .build()?;

        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let relay = Arc::new(NotificationRelay::new());
        let provider = Arc::new(ProviderClient::new(config.provider.clone(), http.clone()));
        let manager = Arc::new(CredentialManager::new(store.clone(), provider.clone()));

        Ok(Self {
            state: Arc::new(AppState {
                config,
                store,
                relay,
                manager,
                provider,
                http,
            }),
        })
    }

    /// Run the server until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid or the listener
    /// cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.state
                .config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.state.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));

        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.state.config.server.host, port = self.state.config.server.port, "Listening");
        info!("Event stream:   http://{addr}/events");
        info!("Authorize:      http://{addr}/oauth/authorize");
        info!("OAuth callback: http://{addr}/oauth/callback");
        info!("Proxy:          http://{addr}/api/query");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
