//! OAuth Relay Library
//!
//! Out-of-band OAuth token relay: completes the authorization code flow on
//! behalf of browser pages that cannot receive a redirect themselves, and
//! proxies their API calls with automatic token refresh.
//!
//! # Flow
//!
//! 1. The page opens `GET /events` and receives a connection id on a
//!    server-sent event stream.
//! 2. The page opens the provider's consent screen in a popup via
//!    `GET /oauth/authorize?state=<connection id>`.
//! 3. The provider redirects to `GET /oauth/callback`; the relay exchanges
//!    the code, stores the credential under a fresh session token, and
//!    pushes both to exactly the connection named by `state`.
//! 4. The page calls `GET /api/query` with the session token as a bearer;
//!    the relay forwards the request with the provider access token and
//!    refreshes it once, transparently, when it expires.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod relay;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
