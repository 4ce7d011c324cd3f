//! Authenticated forwarding proxy
//!
//! GET /api/query forwards a single GET to the provider instance with
//! the session's access token attached. Expired tokens are refreshed and
//! the request retried once before the caller sees an error.

use std::sync::Arc;

use axum::Extension;
use axum::extract::{Query, State};
use axum::response::Json;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::router::AppState;
use crate::oauth::{Credential, SessionKey};
use crate::{Error, Result};

/// Query parameters for the forwarding endpoint
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    /// Absolute URL of the provider resource to fetch
    pub q: Option<String>,
}

/// Forward a GET to the provider under the caller's credential
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionKey>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Value>> {
    let raw = params
        .q
        .ok_or_else(|| Error::InvalidTarget("missing query parameter q".to_string()))?;
    let target = parse_target(&raw)?;

    let restrict = state.config.proxy.restrict_to_instance;
    let marker = state.config.provider.invalid_session_code.clone();
    let http = state.http.clone();

    let body = state
        .manager
        .execute(&session, move |credential| {
            let http = http.clone();
            let target = target.clone();
            let marker = marker.clone();
            async move {
                if restrict {
                    check_instance_host(&target, &credential)?;
                }
                api_get(&http, &target, &credential, &marker).await
            }
        })
        .await?;

    Ok(Json(body))
}

/// Parse and vet the forwarding target
fn parse_target(raw: &str) -> Result<Url> {
    let url =
        Url::parse(raw).map_err(|e| Error::InvalidTarget(format!("not an absolute URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidTarget(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidTarget("target has no host".to_string()));
    }

    Ok(url)
}

/// Reject targets outside the credential's own instance
fn check_instance_host(target: &Url, credential: &Credential) -> Result<()> {
    let instance = Url::parse(&credential.instance_url)
        .map_err(|e| Error::Internal(format!("stored instance URL is invalid: {e}")))?;

    if target.host_str() != instance.host_str() {
        return Err(Error::InvalidTarget(format!(
            "target host {} is not the credential's instance",
            target.host_str().unwrap_or("<none>")
        )));
    }

    Ok(())
}

/// Perform the authenticated GET and decode the JSON body.
///
/// A 401 whose body carries the provider's invalid-session marker means
/// the access token expired; any other non-success status is the
/// provider rejecting the request itself.
async fn api_get(
    http: &Client,
    target: &Url,
    credential: &Credential,
    invalid_session_marker: &str,
) -> Result<Value> {
    debug!(target = %target, "Forwarding GET");

    let response = http
        .get(target.clone())
        .bearer_auth(&credential.access_token)
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if status == reqwest::StatusCode::UNAUTHORIZED && body.contains(invalid_session_marker) {
        return Err(Error::InvalidSession);
    }
    if !status.is_success() {
        return Err(Error::ProviderRejected {
            status: status.as_u16(),
            message: body,
        });
    }

    serde_json::from_str(&body).map_err(|e| Error::UpstreamFormat(format!("response body: {e}")))
}
