//! OAuth credential handling
//!
//! Covers the full credential lifecycle: code exchange against the
//! provider, session-keyed storage, and refresh-on-expiry around
//! authenticated operations.

mod manager;
mod provider;
mod store;

pub use manager::{CredentialManager, TokenRefresher};
pub use provider::ProviderClient;
pub use store::{Credential, MemoryTokenStore, SessionKey, TokenStore};
