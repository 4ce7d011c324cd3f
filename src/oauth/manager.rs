//! Credential lifecycle around authenticated operations

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{Credential, SessionKey, TokenStore};
use crate::{Error, Result};

/// Mints a replacement credential from one the provider stopped accepting
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the current credential for a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGrant`] when the refresh token itself is no
    /// longer accepted and the user must re-authorize.
    async fn refresh(&self, current: &Credential) -> Result<Credential>;
}

/// Runs operations under a session's credential, refreshing once on expiry.
///
/// An operation that fails with [`Error::InvalidSession`] is retried exactly
/// once after a refresh. Concurrent expiries on the same session share one
/// refresh.
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl CredentialManager {
    /// Create a manager over the given store and refresher
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_locks: DashMap::new(),
        }
    }

    /// Run `operation` with the session's credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthorizationRequired`] when the session has no
    /// credential, when the refresh token is rejected, or when a freshly
    /// refreshed token is still not accepted. Other operation errors pass
    /// through unchanged.
    pub async fn execute<T, F, Fut>(&self, session: &SessionKey, operation: F) -> Result<T>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credential = self
            .store
            .get(session)
            .ok_or(Error::AuthorizationRequired)?;

        match operation(credential.clone()).await {
            Err(Error::InvalidSession) => {
                debug!(session = %session, "Access token rejected, refreshing");
                let refreshed = self.refresh_credential(session, &credential).await?;

                match operation(refreshed).await {
                    Err(Error::InvalidSession) => {
                        warn!(
                            session = %session,
                            "Token rejected again after refresh, clearing credential"
                        );
                        self.store.clear(session)?;
                        Err(Error::AuthorizationRequired)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Replace the session's credential, deduplicating concurrent refreshes.
    ///
    /// Holders of a stale credential that lose the race adopt whatever the
    /// winner stored instead of refreshing again.
    async fn refresh_credential(
        &self,
        session: &SessionKey,
        failed: &Credential,
    ) -> Result<Credential> {
        let lock = self
            .refresh_locks
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A concurrent request may have finished the refresh while we
        // waited for the lock.
        if let Some(current) = self.store.get(session) {
            if current.access_token != failed.access_token {
                debug!(session = %session, "Adopting credential refreshed by concurrent request");
                return Ok(current);
            }
        }

        // The stale credential is evicted before the refresh call so a
        // failed refresh never leaves it behind.
        self.store.clear(session)?;

        let refreshed = match self.refresher.refresh(failed).await {
            Ok(credential) => credential,
            Err(Error::InvalidGrant) => {
                info!(session = %session, "Refresh token rejected, re-authorization required");
                return Err(Error::AuthorizationRequired);
            }
            Err(e) => return Err(e),
        };

        self.store.set(session, refreshed.clone())?;
        info!(session = %session, "Access token refreshed");
        Ok(refreshed)
    }
}
