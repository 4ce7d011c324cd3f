//! Authorization entry and provider callback endpoints
//!
//! The callback always answers the popup with a human-readable page.
//! Whatever happened is also pushed to the connection named by `state`,
//! so the page that started the flow learns the outcome without polling.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::router::AppState;
use crate::oauth::SessionKey;
use crate::relay::RelayMessage;

/// Query parameters for starting an authorization flow
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    /// Connection id to thread through the provider as `state`
    pub state: Option<String>,
}

/// Query parameters the provider redirects back with
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// Connection id round-tripped through the provider
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Redirect the popup to the provider's authorization endpoint
pub async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Some(connection_id) = params.state.filter(|s| !s.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(
                "missing_state",
                "A connection id is required to start authorization",
            )),
        )
            .into_response();
    };

    match state.provider.authorization_url(&connection_id) {
        Ok(url) => Redirect::temporary(url.as_str()).into_response(),
        Err(e) => {
            error!("Cannot build authorization URL: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(error_page("configuration", "The provider is not configured")),
            )
                .into_response()
        }
    }
}

/// Handle the provider redirect: exchange the code, store the credential,
/// and push the outcome to the waiting connection
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    // Without state there is no connection to notify, so nothing is pushed.
    // Connection ids are never empty, so a blank state counts as missing.
    let Some(connection_id) = params.state.filter(|s| !s.is_empty()) else {
        warn!("Callback without state parameter");
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("missing_state", "State parameter not provided")),
        );
    };

    if let Some(provider_error) = params.error {
        let reason = match &params.error_description {
            Some(description) => format!("{provider_error}: {description}"),
            None => provider_error.clone(),
        };
        warn!(connection_id = %connection_id, "Provider returned an error: {reason}");

        state.relay.deliver(
            &connection_id,
            RelayMessage::OAuthFailed {
                reason: reason.clone(),
            },
        );
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(&provider_error, &reason)),
        );
    }

    let Some(code) = params.code else {
        warn!(connection_id = %connection_id, "Callback without code parameter");
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("missing_code", "Authorization code not provided")),
        );
    };

    match state.provider.exchange_code(&code).await {
        Ok(credential) => {
            let session = SessionKey::generate();
            if let Err(e) = state.store.set(&session, credential.clone()) {
                error!(connection_id = %connection_id, "Failed to store credential: {e}");
                state.relay.deliver(
                    &connection_id,
                    RelayMessage::OAuthFailed {
                        reason: "credential storage failed".to_string(),
                    },
                );
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html(error_page("storage", "The credential could not be stored")),
                );
            }

            let delivered = state.relay.deliver(
                &connection_id,
                RelayMessage::OAuthComplete {
                    session: session.clone(),
                    credential,
                },
            );
            if delivered {
                info!(
                    connection_id = %connection_id,
                    session = %session,
                    "Authorization complete, credential pushed"
                );
            } else {
                info!(
                    connection_id = %connection_id,
                    session = %session,
                    "Authorization complete, no connection waiting"
                );
            }

            (StatusCode::OK, Html(success_page()))
        }
        Err(e) => {
            warn!(connection_id = %connection_id, "Code exchange failed: {e}");
            state.relay.deliver(
                &connection_id,
                RelayMessage::OAuthFailed {
                    reason: e.to_string(),
                },
            );
            (
                StatusCode::BAD_GATEWAY,
                Html(error_page("exchange_failed", &e.to_string())),
            )
        }
    }
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Complete</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #11998e 0%, #38ef7d 100%);
            color: white;
        }
        .container {
            text-align: center;
            padding: 2rem;
            background: rgba(255,255,255,0.1);
            border-radius: 16px;
            backdrop-filter: blur(10px);
        }
        .checkmark {
            font-size: 4rem;
            margin-bottom: 1rem;
        }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
    </style>
</head>
<body>
    <div class="container">
        <div class="checkmark">✓</div>
        <h1>Authorization Complete</h1>
        <p>You can close this window and return to the app.</p>
    </div>
    <script>setTimeout(() => window.close(), 2500);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #e74c3c 0%, #c0392b 100%);
            color: white;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            background: rgba(255,255,255,0.1);
            border-radius: 16px;
            backdrop-filter: blur(10px);
            max-width: 400px;
        }}
        .error-icon {{
            font-size: 4rem;
            margin-bottom: 1rem;
        }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        p {{ margin: 0; opacity: 0.9; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="error-icon">✗</div>
        <h1>Authorization Failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
    </div>
</body>
</html>"#
    )
}
