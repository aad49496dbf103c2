//! YAML-file credential store.
//!
//! ```yaml
//! principals:
//!   - id: alice
//!     credential: "sha256$<salt hex>$<digest hex>"
//!   - id: batch-loader
//!     credential: "sha256$...$..."
//!     disabled: true
//! ```
//!
//! The whole table is swapped atomically on [`FileCredentialStore::reload`];
//! lookups in flight keep reading the table they started with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{CredentialStore, Principal, StoreError, StoredCredential};
use crate::{Error, Result};

/// On-disk document layout.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CredentialsFile {
    /// All principals.
    #[serde(default)]
    pub principals: Vec<Principal>,
}

impl CredentialsFile {
    /// Parse from YAML text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Credentials(e.to_string()))
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn into_table(self) -> HashMap<String, Principal> {
        let mut table = HashMap::with_capacity(self.principals.len());
        for principal in self.principals {
            if table.contains_key(&principal.id) {
                warn!(principal = %principal.id, "Duplicate principal in credentials file, keeping last");
            }
            table.insert(principal.id.clone(), principal);
        }
        table
    }
}

/// Render `principals` as a credentials file document.
pub fn credentials_yaml(principals: &[Principal]) -> Result<String> {
    CredentialsFile {
        principals: principals.to_vec(),
    }
    .to_yaml()
}

/// Credential store backed by a YAML file.
pub struct FileCredentialStore {
    path: PathBuf,
    table: RwLock<Arc<HashMap<String, Principal>>>,
}

impl FileCredentialStore {
    /// Load the credentials file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = Self::read_table(&path).await?;
        info!(path = %path.display(), principals = table.len(), "Loaded credentials file");
        Ok(Self {
            path,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Re-read the file and replace the table. On error the old table stays.
    pub async fn reload(&self) -> Result<usize> {
        let table = Self::read_table(&self.path).await?;
        let count = table.len();
        *self.table.write() = Arc::new(table);
        info!(path = %self.path.display(), principals = count, "Reloaded credentials file");
        Ok(count)
    }

    /// Number of principals currently loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether no principals are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn read_table(path: &Path) -> Result<HashMap<String, Principal>> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(CredentialsFile::parse(&text)?.into_table())
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn lookup(
        &self,
        principal_id: &str,
    ) -> std::result::Result<StoredCredential, StoreError> {
        let table = Arc::clone(&*self.table.read());
        match table.get(principal_id) {
            Some(p) if !p.disabled => Ok(p.credential.clone()),
            _ => Err(StoreError::NotFound),
        }
    }
}
