//! # Token Store
//!
//! Sole owner of the persisted access/refresh token pair and the credential
//! epoch. Every mutation bumps the epoch and broadcasts an [`AuthEvent`], so
//! caches keyed by the old epoch go stale and channels reconnect under the
//! new credentials.
//!
//! Storage failures are logged and swallowed: a full disk must never crash
//! an identity check.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::events::{AuthEvent, EventBus};

/// Access/refresh token pair as returned by login or refresh endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// What the storage backend persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(default)]
    pub epoch: String,
}

/// Persistent client storage.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> AuthResult<StoredTokens>;
    fn save(&self, tokens: &StoredTokens) -> AuthResult<()>;
}

/// Process-local storage, used when no token file is configured.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<StoredTokens>,
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> AuthResult<StoredTokens> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &StoredTokens) -> AuthResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = tokens.clone();
        Ok(())
    }
}

/// JSON file storage.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> AuthResult<StoredTokens> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredTokens::default()),
            Err(e) => Err(AuthError::Storage {
                reason: format!("Failed to read '{}': {}", self.path.display(), e),
            }),
        }
    }

    fn save(&self, tokens: &StoredTokens) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tokens)?;
        std::fs::write(&self.path, json).map_err(|e| AuthError::Storage {
            reason: format!("Failed to write '{}': {}", self.path.display(), e),
        })
    }
}

/// Cloneable handle to the token store.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

struct TokenStoreInner {
    storage: Box<dyn TokenStorage>,
    current: Mutex<StoredTokens>,
    events: EventBus,
}

impl TokenStore {
    /// Open a store over `storage`, loading whatever it already holds.
    pub fn new(storage: impl TokenStorage + 'static, events: EventBus) -> Self {
        let mut current = storage.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Token storage unreadable, starting empty");
            StoredTokens::default()
        });
        if current.epoch.is_empty() {
            current.epoch = next_epoch("");
        }

        Self {
            inner: Arc::new(TokenStoreInner {
                storage: Box::new(storage),
                current: Mutex::new(current),
                events,
            }),
        }
    }

    /// In-memory store, handy for tests and the CLI without a token file.
    pub fn in_memory(events: EventBus) -> Self {
        Self::new(MemoryStorage::default(), events)
    }

    pub fn get_token(&self) -> Option<String> {
        self.lock().tokens.access.clone()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.lock().tokens.refresh.clone()
    }

    pub fn get_epoch(&self) -> String {
        self.lock().epoch.clone()
    }

    /// Store a new access token. A `None` refresh token keeps the existing one.
    pub fn set_tokens(&self, access: impl Into<String>, refresh: Option<String>) {
        let epoch = self.mutate(|stored| {
            stored.tokens.access = Some(access.into());
            if refresh.is_some() {
                stored.tokens.refresh = refresh;
            }
        });
        tracing::info!(epoch = %epoch, "Tokens set");
        self.inner.events.emit(AuthEvent::TokensSet { epoch });
    }

    pub fn clear_tokens(&self) {
        let epoch = self.mutate(|stored| stored.tokens = TokenPair::default());
        tracing::info!(epoch = %epoch, "Tokens cleared");
        self.inner.events.emit(AuthEvent::TokensCleared { epoch });
    }

    /// Move to a new epoch without touching the tokens.
    pub fn bump_epoch(&self) -> String {
        let epoch = self.mutate(|_| {});
        tracing::info!(epoch = %epoch, "Token epoch bumped");
        self.inner.events.emit(AuthEvent::EpochBumped {
            epoch: epoch.clone(),
        });
        epoch
    }

    fn mutate(&self, update: impl FnOnce(&mut StoredTokens)) -> String {
        let snapshot = {
            let mut current = self.lock();
            update(&mut current);
            current.epoch = next_epoch(&current.epoch);
            current.clone()
        };

        if let Err(e) = self.inner.storage.save(&snapshot) {
            tracing::warn!(error = %e, "Failed to persist tokens, continuing in memory");
        }
        snapshot.epoch
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredTokens> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Millisecond timestamp, forced past the previous epoch so rapid
/// mutations still produce distinct values.
fn next_epoch(previous: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    let floor = previous.parse::<u64>().map_or(0, |p| p.saturating_add(1));
    now.max(floor).to_string()
}
