//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `env:VAR` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth provider endpoints and client registration
    pub provider: ProviderConfig,
    /// Push relay configuration
    pub relay: RelayConfig,
    /// Forwarding proxy configuration
    pub proxy: ProxyConfig,
    /// Cross-origin configuration for the browser page
    pub cors: CorsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Timeout for outbound provider and upstream requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4180,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// OAuth provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Authorization endpoint the popup is redirected to
    pub authorize_url: String,
    /// Token endpoint for code and refresh exchanges
    pub token_url: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret.
    /// Supports a literal value, `env:VAR_NAME`, or `${VAR}` expansion.
    pub client_secret: String,
    /// Redirect URI registered with the provider (must point at /oauth/callback)
    pub redirect_uri: String,
    /// Scope requested at authorization
    pub scope: Option<String>,
    /// API version pushed to the browser page alongside the credential
    pub api_version: String,
    /// Marker the provider includes in 401 bodies when the access token is stale
    pub invalid_session_code: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorize_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scope: None,
            api_version: "v1".to_string(),
            invalid_session_code: "INVALID_SESSION_ID".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }
}

/// Push relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Keep-alive interval for event streams
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

/// Forwarding proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Only forward to the host of the credential's own instance.
    /// Disabling this lets callers point the proxy at arbitrary http(s) hosts.
    pub restrict_to_instance: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            restrict_to_instance: true,
        }
    }
}

/// Cross-origin configuration for the browser page
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the relay from a browser.
    /// Empty means same-origin only; `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OAUTH_RELAY_ prefix)
        figment = figment.merge(Env::prefixed("OAUTH_RELAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in provider settings
        config.expand_env_vars();

        Ok(config)
    }

    /// Validate fields the server cannot start without
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing provider setting.
    pub fn validate(&self) -> Result<()> {
        if self.provider.authorize_url.is_empty() {
            return Err(Error::Config("provider.authorize_url is required".to_string()));
        }
        if self.provider.token_url.is_empty() {
            return Err(Error::Config("provider.token_url is required".to_string()));
        }
        if self.provider.client_id.is_empty() {
            return Err(Error::Config("provider.client_id is required".to_string()));
        }
        if self.provider.redirect_uri.is_empty() {
            return Err(Error::Config("provider.redirect_uri is required".to_string()));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in provider settings
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for value in [
            &mut self.provider.authorize_url,
            &mut self.provider.token_url,
            &mut self.provider.client_id,
            &mut self.provider.client_secret,
            &mut self.provider.redirect_uri,
        ] {
            *value = Self::expand_string(&re, value);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}
