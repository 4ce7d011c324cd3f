//! Session bearer authentication for proxy routes

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::Error;
use crate::oauth::SessionKey;

/// Extract the bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get("authorization")?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
}

/// Require a session token on the request.
///
/// The token is only attached here, not looked up. A token no credential
/// was ever stored under surfaces later as an authorization-required
/// error from the credential manager.
pub async fn session_auth(mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(request.headers()).filter(|t| !t.is_empty()) else {
        warn!(
            method = %request.method(),
            path = request.uri().path(),
            "Request without session bearer token"
        );
        return Error::Unauthorized.into_response();
    };

    let session = SessionKey::from(token);
    request.extensions_mut().insert(session);
    next.run(request).await
}
