//! Error types for the OAuth relay

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the OAuth relay
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable credential for the session; the OAuth flow must be (re)started
    #[error("Authorization required")]
    AuthorizationRequired,

    /// Callback request did not carry a state parameter
    #[error("Missing state parameter")]
    MissingState,

    /// Callback request did not carry an authorization code
    #[error("Missing authorization code")]
    MissingCode,

    /// The provider rejected the access token as expired or invalid
    #[error("Session expired or invalid")]
    InvalidSession,

    /// The provider rejected the refresh token
    #[error("Refresh token rejected")]
    InvalidGrant,

    /// The provider rejected a request for a non-token reason
    #[error("Provider rejected request (HTTP {status}): {message}")]
    ProviderRejected {
        /// Upstream HTTP status
        status: u16,
        /// Upstream error body or description
        message: String,
    },

    /// The caller did not present a well-formed bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Upstream returned a success status with a body that is not valid JSON
    #[error("Upstream returned an unparseable body: {0}")]
    UpstreamFormat(String),

    /// The requested proxy target is not an acceptable URL
    #[error("Invalid proxy target: {0}")]
    InvalidTarget(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable error code used in HTTP error bodies
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::AuthorizationRequired => "authorization_required",
            Self::MissingState => "missing_state",
            Self::MissingCode => "missing_code",
            Self::InvalidSession => "invalid_session",
            Self::InvalidGrant => "invalid_grant",
            Self::ProviderRejected { .. } => "provider_rejected",
            Self::Unauthorized => "unauthorized",
            Self::UpstreamFormat(_) => "upstream_format",
            Self::InvalidTarget(_) => "invalid_target",
            Self::Http(_) => "upstream_error",
            _ => "internal",
        }
    }

    /// HTTP status this error maps to at the proxy boundary
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AuthorizationRequired | Self::InvalidGrant | Self::InvalidSession => {
                StatusCode::FORBIDDEN
            }
            Self::MissingState | Self::MissingCode | Self::InvalidTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ProviderRejected { .. } | Self::UpstreamFormat(_) | Self::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        if matches!(self, Self::Unauthorized) {
            (status, [("WWW-Authenticate", "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
