//! OAuth provider client for code exchange and token refresh

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::manager::TokenRefresher;
use super::store::Credential;
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Client for the provider's authorization and token endpoints
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    config: ProviderConfig,
    client_secret: String,
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    refresh_token: Option<String>,
    instance_url: Option<String>,
}

/// Error body returned by the token endpoint
#[derive(Debug, Deserialize)]
struct TokenEndpointError {
    error: String,
    error_description: Option<String>,
}

impl ProviderClient {
    /// Create a client for the configured provider.
    /// The client secret is resolved once, at construction.
    #[must_use]
    pub fn new(config: ProviderConfig, http: Client) -> Self {
        let client_secret = config.resolve_client_secret();
        Self {
            http,
            config,
            client_secret,
        }
    }

    /// Build the authorization URL the popup is redirected to.
    /// The caller's connection id travels through the flow as `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured authorize URL is not parseable.
    pub fn authorization_url(&self, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| Error::Config(format!("invalid provider.authorize_url: {e}")))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state);

        if let Some(scope) = &self.config.scope {
            url.query_pairs_mut().append_pair("scope", scope);
        }

        Ok(url)
    }

    /// Exchange an authorization code for a full credential
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGrant`] when the provider rejects the code,
    /// [`Error::ProviderRejected`] for other provider errors, and
    /// [`Error::UpstreamFormat`] when the response omits required fields.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        debug!("Exchanging authorization code");
        let token = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", &self.config.redirect_uri),
            ])
            .await?;

        // A fresh credential is only usable if we know which instance it
        // belongs to.
        let instance_url = token.instance_url.clone().ok_or_else(|| {
            Error::UpstreamFormat("token response missing instance_url".to_string())
        })?;

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            instance_url,
            api_version: self.config.api_version.clone(),
        })
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenEndpointResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(token_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::UpstreamFormat(format!("token response: {e}")))
    }
}

#[async_trait]
impl TokenRefresher for ProviderClient {
    async fn refresh(&self, current: &Credential) -> Result<Credential> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            info!("Credential has no refresh token, re-authorization required");
            return Err(Error::InvalidGrant);
        };

        debug!("Refreshing access token");
        let token = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;

        Ok(replacement_credential(current, token))
    }
}

/// Map a token endpoint error body to a relay error
fn token_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<TokenEndpointError>(body) {
        Ok(err) if err.error == "invalid_grant" => Error::InvalidGrant,
        Ok(err) => Error::ProviderRejected {
            status,
            message: match err.error_description {
                Some(desc) => format!("{}: {desc}", err.error),
                None => err.error,
            },
        },
        Err(_) => Error::ProviderRejected {
            status,
            message: body.to_string(),
        },
    }
}

/// Build the replacement credential after a refresh.
///
/// Fields the provider omitted are carried forward from the credential
/// being replaced. The replacement is complete before the store is touched.
fn replacement_credential(current: &Credential, token: TokenEndpointResponse) -> Credential {
    Credential {
        access_token: token.access_token,
        refresh_token: token.refresh_token.or_else(|| current.refresh_token.clone()),
        instance_url: token
            .instance_url
            .unwrap_or_else(|| current.instance_url.clone()),
        api_version: current.api_version.clone(),
    }
}
