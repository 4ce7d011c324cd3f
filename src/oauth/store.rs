//! Credential storage keyed by session

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A provider credential held on behalf of one session.
///
/// This is the unit of replacement: a refresh never patches fields in
/// place, it swaps the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token presented to the provider API
    pub access_token: String,
    /// Long-lived token used to mint replacement access tokens
    pub refresh_token: Option<String>,
    /// Base URL of the instance this credential is scoped to
    pub instance_url: String,
    /// API version the browser page should use against the instance
    pub api_version: String,
}

/// Opaque key identifying one authorized session.
///
/// Minted when a callback completes, handed to the browser page, and
/// presented back as a bearer token on proxy calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Mint a fresh random key
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(format!("sess_{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// The full key value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionKey {
    /// Truncated form, safe to log
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => write!(f, "{}...", &self.0[..idx]),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Storage for credentials keyed by session.
///
/// Implementations must tolerate clearing keys that were never set.
pub trait TokenStore: Send + Sync {
    /// Look up the credential for a session
    fn get(&self, session: &SessionKey) -> Option<Credential>;

    /// Store or replace the credential for a session
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    fn set(&self, session: &SessionKey, credential: Credential) -> Result<()>;

    /// Remove the credential for a session. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the removal.
    fn clear(&self, session: &SessionKey) -> Result<()>;
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    credentials: DashMap<SessionKey, Credential>,
}

impl MemoryTokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a stored credential
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether no session holds a credential
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, session: &SessionKey) -> Option<Credential> {
        self.credentials.get(session).map(|entry| entry.clone())
    }

    fn set(&self, session: &SessionKey, credential: Credential) -> Result<()> {
        self.credentials.insert(session.clone(), credential);
        Ok(())
    }

    fn clear(&self, session: &SessionKey) -> Result<()> {
        self.credentials.remove(session);
        Ok(())
    }
}
