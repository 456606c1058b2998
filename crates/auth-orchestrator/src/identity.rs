//! # Resilient Identity Fetcher
//!
//! Wraps [`SessionBackend::fetch_identity`] with bounded retries and a
//! short-lived cache so bursts of checks collapse into one request. Only
//! the orchestrator calls this; the connection hub never does.
//!
//! The cache is keyed by the token store epoch, so any token mutation
//! makes the cached identity stale immediately.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::SessionBackend;
use crate::config::IdentityConfig;
use crate::error::AuthResult;
use crate::protocol::identity::Identity;
use crate::retry::{RetryPolicy, with_retry};
use crate::token_store::TokenStore;

#[derive(Debug, Clone)]
struct CachedIdentity {
    identity: Identity,
    epoch: String,
    fetched_at: Instant,
}

/// Snapshot of the fetcher cache for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub cached: bool,
    pub age: Option<Duration>,
    pub epoch: Option<String>,
}

pub struct ResilientIdentityFetcher {
    backend: Arc<dyn SessionBackend>,
    tokens: TokenStore,
    policy: RetryPolicy,
    ttl: Duration,
    cache: Mutex<Option<CachedIdentity>>,
}

impl ResilientIdentityFetcher {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        tokens: TokenStore,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            backend,
            tokens,
            policy: RetryPolicy::from_identity_config(config),
            ttl: Duration::from_millis(config.cache_ttl_ms),
            cache: Mutex::new(None),
        }
    }

    /// Cached identity if fresh, otherwise a live fetch with retries.
    ///
    /// # Errors
    /// Client errors other than `408`/`429` fail on the first attempt.
    /// Transient failures surface as
    /// [`AuthError::RetriesExhausted`](crate::AuthError::RetriesExhausted)
    /// once the policy runs out.
    pub async fn get_identity(&self) -> AuthResult<Identity> {
        let epoch = self.tokens.get_epoch();
        if let Some(hit) = self.cached(&epoch) {
            tracing::trace!("Identity served from cache");
            return Ok(hit);
        }

        let identity = with_retry(&self.policy, || {
            let backend = Arc::clone(&self.backend);
            let token = self.tokens.get_token();
            async move { backend.fetch_identity(token.as_deref()).await }
        })
        .await?;

        // A missing identifier is expected to resolve itself; never pin it.
        if !matches!(identity, Identity::MissingIdentifier { .. }) {
            *self.lock() = Some(CachedIdentity {
                identity: identity.clone(),
                epoch,
                fetched_at: Instant::now(),
            });
        }
        Ok(identity)
    }

    pub fn clear_cache(&self) {
        *self.lock() = None;
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        match self.lock().as_ref() {
            Some(entry) => CacheStatus {
                cached: true,
                age: Some(entry.fetched_at.elapsed()),
                epoch: Some(entry.epoch.clone()),
            },
            None => CacheStatus {
                cached: false,
                age: None,
                epoch: None,
            },
        }
    }

    fn cached(&self, epoch: &str) -> Option<Identity> {
        let cache = self.lock();
        let entry = cache.as_ref()?;
        (entry.epoch == epoch && entry.fetched_at.elapsed() < self.ttl)
            .then(|| entry.identity.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedIdentity>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
