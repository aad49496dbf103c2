//! Credential store adapters and verification.
//!
//! The [`CredentialStore`] trait abstracts over whatever holds principals'
//! stored credential material. Two implementations ship here:
//!
//! - [`InMemoryCredentialStore`]: a `DashMap`, seeded from configuration and
//!   mutated by admin operations.
//! - [`FileCredentialStore`]: a YAML document loaded at startup and reloadable.
//!
//! Both report unknown and disabled principals as the same
//! [`StoreError::NotFound`]; callers cannot tell them apart.

pub mod file;
pub mod verifier;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub use file::{CredentialsFile, FileCredentialStore, credentials_yaml};
pub use verifier::{CredentialVerifier, Secret, StoredCredential};

/// An identity that can authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Unique principal identifier.
    pub id: String,
    /// Salted digest of the principal's secret.
    pub credential: StoredCredential,
    /// Disabled principals are reported as not found.
    #[serde(default)]
    pub disabled: bool,
    /// Creation time (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Create an enabled principal, deriving stored material from `secret`.
    #[must_use]
    pub fn new(id: impl Into<String>, secret: &str) -> Self {
        Self {
            id: id.into(),
            credential: StoredCredential::derive(secret),
            disabled: false,
            created_at: Some(Utc::now()),
        }
    }
}

/// Transient credentials for a single authentication call.
#[derive(Debug, Clone)]
pub struct CredentialSubmission {
    /// Claimed principal identifier.
    pub principal_id: String,
    /// Presented secret.
    pub secret: Secret,
}

impl CredentialSubmission {
    /// Build a submission.
    #[must_use]
    pub fn new(principal_id: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            principal_id: principal_id.into(),
            secret: secret.into(),
        }
    }
}

/// Credential store failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unknown or disabled principal.
    #[error("principal not found")]
    NotFound,
    /// Backing store unreachable.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of stored credential material by principal identifier.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request tasks.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Fetch the stored material for `principal_id`.
    ///
    /// Returns [`StoreError::NotFound`] for unknown *and* disabled principals.
    async fn lookup(&self, principal_id: &str) -> Result<StoredCredential, StoreError>;
}

/// In-memory credential store backed by a `DashMap`.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    principals: DashMap<String, Principal>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `principals`. Later duplicates win.
    #[must_use]
    pub fn from_principals(principals: impl IntoIterator<Item = Principal>) -> Self {
        let store = Self::new();
        for principal in principals {
            store.insert(principal);
        }
        store
    }

    /// Insert or replace a principal.
    pub fn insert(&self, principal: Principal) {
        self.principals.insert(principal.id.clone(), principal);
    }

    /// Mark a principal disabled. Returns `false` if it does not exist.
    pub fn disable(&self, principal_id: &str) -> bool {
        match self.principals.get_mut(principal_id) {
            Some(mut p) => {
                p.disabled = true;
                true
            }
            None => false,
        }
    }

    /// Replace a principal's stored material (admin rotation).
    pub fn set_credential(&self, principal_id: &str, credential: StoredCredential) -> bool {
        match self.principals.get_mut(principal_id) {
            Some(mut p) => {
                p.credential = credential;
                true
            }
            None => false,
        }
    }

    /// Number of principals, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Whether the store holds no principals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, principal_id: &str) -> Result<StoredCredential, StoreError> {
        match self.principals.get(principal_id) {
            Some(p) if !p.disabled => Ok(p.credential.clone()),
            _ => Err(StoreError::NotFound),
        }
    }
}
