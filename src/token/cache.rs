//! Live-token cache and revocation set.
//!
//! A token is live iff its entry exists, is not revoked, and `now < expires_at`.
//! Revoked entries stay in the map until their natural expiry so a revoked
//! token can never become live again, then [`TokenCache::sweep`] drops them.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::TokenId;

/// One issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Token identifier.
    pub token_id: TokenId,
    /// Principal the token was issued to.
    pub principal_id: String,
    /// Expiry (Unix seconds).
    pub expires_at: u64,
    /// Set once by revocation, never cleared.
    pub revoked: bool,
}

/// Cache view of a token identifier at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// Present, not revoked, not expired.
    Live(CacheEntry),
    /// Present and revoked.
    Revoked,
    /// Present but at or past its expiry.
    Expired,
    /// No entry.
    Absent,
}

/// Cache failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backing store unreachable.
    #[error("token cache unavailable: {0}")]
    Unavailable(String),
    /// An entry with this id exists with different fields.
    #[error("token id already registered with different fields")]
    Conflict,
}

/// Storage for issued token identifiers.
///
/// Implementations must be safe under concurrent `register`, `revoke` and
/// `sweep` calls from many tasks.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Record a newly issued token.
    ///
    /// Registering the same id again with identical fields is a no-op and
    /// leaves a revoked entry revoked. Different fields yield
    /// [`CacheError::Conflict`].
    async fn register(
        &self,
        token_id: TokenId,
        principal_id: &str,
        expires_at: u64,
    ) -> Result<(), CacheError>;

    /// Classify `token_id` at `now`.
    async fn liveness(&self, token_id: TokenId, now: u64) -> Result<Liveness, CacheError>;

    /// Whether `token_id` is live at `now`.
    async fn is_live(&self, token_id: TokenId, now: u64) -> Result<bool, CacheError> {
        Ok(matches!(self.liveness(token_id, now).await?, Liveness::Live(_)))
    }

    /// Mark `token_id` revoked. Returns whether this call revoked it, so a
    /// second revocation or an unknown id yields `false` and is not an error.
    async fn revoke(&self, token_id: TokenId) -> Result<bool, CacheError>;

    /// Revoke every token issued to `principal_id`. Returns how many entries
    /// were newly revoked.
    async fn revoke_principal(&self, principal_id: &str) -> Result<usize, CacheError>;

    /// Drop entries with `expires_at <= now`. Returns how many were dropped.
    async fn sweep(&self, now: u64) -> Result<usize, CacheError>;

    /// Number of entries held (live, revoked or awaiting sweep).
    fn len(&self) -> usize;

    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`TokenCache`] on a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryTokenCache {
    entries: DashMap<TokenId, CacheEntry>,
}

impl InMemoryTokenCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one entry.
    #[must_use]
    pub fn get(&self, token_id: TokenId) -> Option<CacheEntry> {
        self.entries.get(&token_id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn register(
        &self,
        token_id: TokenId,
        principal_id: &str,
        expires_at: u64,
    ) -> Result<(), CacheError> {
        match self.entries.entry(token_id) {
            Entry::Occupied(existing) => {
                let e = existing.get();
                if e.principal_id == principal_id && e.expires_at == expires_at {
                    Ok(())
                } else {
                    Err(CacheError::Conflict)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    token_id,
                    principal_id: principal_id.to_string(),
                    expires_at,
                    revoked: false,
                });
                Ok(())
            }
        }
    }

    async fn liveness(&self, token_id: TokenId, now: u64) -> Result<Liveness, CacheError> {
        let Some(entry) = self.entries.get(&token_id) else {
            return Ok(Liveness::Absent);
        };
        Ok(if entry.revoked {
            Liveness::Revoked
        } else if entry.expires_at <= now {
            Liveness::Expired
        } else {
            Liveness::Live(entry.value().clone())
        })
    }

    async fn revoke(&self, token_id: TokenId) -> Result<bool, CacheError> {
        Ok(match self.entries.get_mut(&token_id) {
            Some(mut entry) => !std::mem::replace(&mut entry.revoked, true),
            None => false,
        })
    }

    async fn revoke_principal(&self, principal_id: &str) -> Result<usize, CacheError> {
        let mut revoked = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.principal_id == principal_id && !entry.revoked {
                entry.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn sweep(&self, now: u64) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired tokens");
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
