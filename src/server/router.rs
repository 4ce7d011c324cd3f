//! HTTP router and shared state

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use reqwest::Client;
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::auth::session_auth;
use super::callback::{authorize_handler, callback_handler};
use super::events::events_handler;
use super::proxy::query_handler;
use crate::config::{Config, CorsConfig};
use crate::oauth::{CredentialManager, ProviderClient, TokenStore};
use crate::relay::NotificationRelay;

/// Shared application state
pub struct AppState {
    /// Loaded configuration
    pub config: Config,
    /// Credential storage, keyed by session
    pub store: Arc<dyn TokenStore>,
    /// Push relay for waiting connections
    pub relay: Arc<NotificationRelay>,
    /// Credential lifecycle around authenticated operations
    pub manager: Arc<CredentialManager>,
    /// Provider endpoint client
    pub provider: Arc<ProviderClient>,
    /// HTTP client for forwarded requests
    pub http: Client,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.cors);

    // Session auth covers only the forwarding routes; the OAuth flow and
    // the event stream are reachable before any session exists.
    let api = Router::new()
        .route("/api/query", get(query_handler))
        .route_layer(middleware::from_fn(session_auth));

    Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .route("/oauth/authorize", get(authorize_handler))
        .route("/oauth/callback", get(callback_handler))
        .merge(api)
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.relay.connection_count(),
    }))
}

fn build_cors(config: &CorsConfig) -> CorsLayer {
    if config.allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse()
                .map_err(|e| warn!("Ignoring unparseable CORS origin {origin}: {e}"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
}
