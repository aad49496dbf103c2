//! Signing key manager: current key plus grace-window keys.
//!
//! The key ring is a small closed set of [`KeySlot`]s: exactly one
//! [`KeySlot::Current`] used for issuing, and zero or more
//! [`KeySlot::Grace`] keys that still verify tokens until their deadline.
//!
//! ```text
//! rotate(k2, 10m) at t0
//!   before: [Current(k1)]
//!   after:  [Current(k2), Grace(k1, until t0+10m)]
//! ```
//!
//! Key material is cloned out of the ring (an `Arc<[u8]>` bump) before any
//! HMAC work, so no lock is held during signing or verification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;

/// Minimum key material length in bytes.
pub const MIN_KEY_LEN: usize = 32;

/// Maximum key identifier length in bytes (must fit the token's length byte).
pub const MAX_KEY_ID_LEN: usize = 64;

/// Key construction and rotation errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key id empty or longer than [`MAX_KEY_ID_LEN`].
    #[error("key id must be 1..={MAX_KEY_ID_LEN} bytes")]
    InvalidId,
    /// Key material shorter than [`MIN_KEY_LEN`].
    #[error("key material must be at least {MIN_KEY_LEN} bytes")]
    TooShort,
    /// Key material is not valid hex.
    #[error("key material is not valid hex")]
    Encoding,
    /// A key with this id is already in the ring.
    #[error("key id already in use: {0}")]
    DuplicateId(String),
}

/// HMAC signing key.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    material: Arc<[u8]>,
}

impl SigningKey {
    /// Build from explicit material.
    pub fn new(id: impl Into<String>, material: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_KEY_ID_LEN {
            return Err(KeyError::InvalidId);
        }
        let material = material.into();
        if material.len() < MIN_KEY_LEN {
            return Err(KeyError::TooShort);
        }
        Ok(Self {
            id,
            material: material.into(),
        })
    }

    /// Build from hex-encoded material.
    pub fn from_hex(id: impl Into<String>, material_hex: &str) -> Result<Self, KeyError> {
        let material = hex::decode(material_hex.trim()).map_err(|_| KeyError::Encoding)?;
        Self::new(id, material)
    }

    /// Generate a key with 256 bits of random material.
    pub fn generate(id: impl Into<String>) -> Result<Self, KeyError> {
        let material: [u8; 32] = rand::random();
        Self::new(id, material.to_vec())
    }

    /// Generate a key with a random identifier.
    #[must_use]
    pub fn generate_random_id() -> Self {
        let id = format!("k-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let material: [u8; 32] = rand::random();
        Self {
            id,
            material: material.to_vec().into(),
        }
    }

    /// Key identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw key material.
    #[must_use]
    pub fn material(&self) -> &[u8] {
        &self.material
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A key in the ring.
#[derive(Debug, Clone)]
pub enum KeySlot {
    /// Signs new tokens and verifies existing ones.
    Current(SigningKey),
    /// Verification only, until `valid_until` (Unix seconds, exclusive).
    Grace {
        /// The retired key.
        key: SigningKey,
        /// Deadline after which it is dropped.
        valid_until: u64,
    },
}

impl KeySlot {
    /// The key held by this slot.
    #[must_use]
    pub fn key(&self) -> &SigningKey {
        match self {
            Self::Current(key) | Self::Grace { key, .. } => key,
        }
    }

    /// Whether this slot may verify tokens at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        match self {
            Self::Current(_) => true,
            Self::Grace { valid_until, .. } => now < *valid_until,
        }
    }
}

struct KeyRing {
    current: SigningKey,
    grace: Vec<(SigningKey, u64)>,
}

/// Holds and rotates signing keys.
pub struct KeyManager {
    ring: RwLock<KeyRing>,
}

impl KeyManager {
    /// Create a manager whose only key is `initial`.
    #[must_use]
    pub fn new(initial: SigningKey) -> Self {
        info!(key_id = %initial.id(), "Signing key installed");
        Self {
            ring: RwLock::new(KeyRing {
                current: initial,
                grace: Vec::new(),
            }),
        }
    }

    /// The key used for new issuance.
    #[must_use]
    pub fn current_key(&self) -> SigningKey {
        self.ring.read().current.clone()
    }

    /// Current key plus every grace key still inside its window.
    #[must_use]
    pub fn all_valid_keys(&self, now: u64) -> Vec<KeySlot> {
        let ring = self.ring.read();
        let mut slots = Vec::with_capacity(1 + ring.grace.len());
        slots.push(KeySlot::Current(ring.current.clone()));
        slots.extend(ring.grace.iter().map(|(key, valid_until)| KeySlot::Grace {
            key: key.clone(),
            valid_until: *valid_until,
        }));
        slots.retain(|slot| slot.is_valid_at(now));
        slots
    }

    /// Find a key that may verify at `now` by its identifier.
    #[must_use]
    pub fn find(&self, key_id: &str, now: u64) -> Option<SigningKey> {
        let ring = self.ring.read();
        if ring.current.id() == key_id {
            return Some(ring.current.clone());
        }
        ring.grace
            .iter()
            .find(|(key, valid_until)| key.id() == key_id && now < *valid_until)
            .map(|(key, _)| key.clone())
    }

    /// Install `new_key` as current; the previous current key keeps verifying
    /// until `now + grace`.
    pub fn rotate(&self, new_key: SigningKey, grace: Duration, now: u64) -> Result<(), KeyError> {
        let mut guard = self.ring.write();
        let ring = &mut *guard;

        let in_use = ring.current.id() == new_key.id()
            || ring.grace.iter().any(|(k, until)| k.id() == new_key.id() && now < *until);
        if in_use {
            return Err(KeyError::DuplicateId(new_key.id().to_string()));
        }

        let valid_until = now.saturating_add(grace.as_secs());
        let previous = std::mem::replace(&mut ring.current, new_key);
        ring.grace.retain(|(_, until)| now < *until);
        if valid_until > now {
            ring.grace.push((previous.clone(), valid_until));
        }

        info!(
            key_id = %ring.current.id(),
            previous = %previous.id(),
            grace_until = valid_until,
            "Signing key rotated"
        );
        Ok(())
    }

    /// Drop grace keys whose window has closed. Returns how many were dropped.
    pub fn prune(&self, now: u64) -> usize {
        let mut ring = self.ring.write();
        let before = ring.grace.len();
        ring.grace.retain(|(key, until)| {
            let keep = now < *until;
            if !keep {
                debug!(key_id = %key.id(), "Grace window closed, dropping key");
            }
            keep
        });
        before - ring.grace.len()
    }
}

/// Spawn a task that rotates in a freshly generated key every `interval`.
///
/// The task exits when `cancel` fires.
pub fn spawn_rotator(
    keys: Arc<KeyManager>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    grace: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the initial key is already fresh.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = keys.rotate(SigningKey::generate_random_id(), grace, clock.now()) {
                        tracing::warn!(error = %e, "Scheduled key rotation failed");
                    }
                }
                () = cancel.cancelled() => {
                    debug!("Key rotator shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> SigningKey {
        SigningKey::new(id, vec![id.len() as u8; MIN_KEY_LEN]).unwrap()
    }

    #[test]
    fn new_key_validation() {
        assert_eq!(SigningKey::new("", vec![0; 32]).unwrap_err(), KeyError::InvalidId);
        assert_eq!(
            SigningKey::new("x".repeat(65), vec![0; 32]).unwrap_err(),
            KeyError::InvalidId
        );
        assert_eq!(SigningKey::new("k", vec![0; 31]).unwrap_err(), KeyError::TooShort);
        assert_eq!(SigningKey::from_hex("k", "zz").unwrap_err(), KeyError::Encoding);
        assert!(SigningKey::from_hex("k", &"ab".repeat(32)).is_ok());
    }

    #[test]
    fn rotation_keeps_previous_key_for_grace_window() {
        // GIVEN: k1 current
        let keys = KeyManager::new(key("k1"));

        // WHEN: rotating to k2 at t=100 with 60s grace
        keys.rotate(key("k2"), Duration::from_secs(60), 100).unwrap();

        // THEN: k2 is current, k1 verifies until t=160
        assert_eq!(keys.current_key().id(), "k2");
        assert!(keys.find("k1", 159).is_some());
        assert!(keys.find("k1", 160).is_none());

        let ids: Vec<_> = keys
            .all_valid_keys(120)
            .iter()
            .map(|s| s.key().id().to_string())
            .collect();
        assert_eq!(ids, vec!["k2", "k1"]);
        assert_eq!(keys.all_valid_keys(200).len(), 1);
    }

    #[test]
    fn zero_grace_drops_previous_immediately() {
        let keys = KeyManager::new(key("k1"));
        keys.rotate(key("k2"), Duration::ZERO, 100).unwrap();
        assert!(keys.find("k1", 100).is_none());
    }

    #[test]
    fn multiple_rotations_keep_independent_deadlines() {
        let keys = KeyManager::new(key("k1"));
        keys.rotate(key("k2"), Duration::from_secs(100), 0).unwrap();
        keys.rotate(key("k3"), Duration::from_secs(10), 50).unwrap();

        // k1 until 100, k2 until 60
        assert!(keys.find("k1", 70).is_some());
        assert!(keys.find("k2", 70).is_none());
        assert!(keys.find("k3", 70).is_some());
    }

    #[test]
    fn rotate_rejects_duplicate_ids() {
        let keys = KeyManager::new(key("k1"));
        assert_eq!(
            keys.rotate(key("k1"), Duration::from_secs(5), 0),
            Err(KeyError::DuplicateId("k1".to_string()))
        );
        keys.rotate(key("k2"), Duration::from_secs(5), 0).unwrap();
        assert!(keys.rotate(key("k1"), Duration::from_secs(5), 1).is_err());
        // once k1's grace window has closed the id may be reused
        assert!(keys.rotate(key("k1"), Duration::from_secs(5), 10).is_ok());
    }

    #[test]
    fn prune_removes_closed_windows() {
        let keys = KeyManager::new(key("k1"));
        keys.rotate(key("k2"), Duration::from_secs(10), 0).unwrap();
        assert_eq!(keys.prune(5), 0);
        assert_eq!(keys.prune(10), 1);
        assert_eq!(keys.all_valid_keys(0).len(), 1);
    }

    #[test]
    fn debug_hides_material() {
        let k = SigningKey::new("visible", vec![0xee; 32]).unwrap();
        let rendered = format!("{k:?}");
        assert!(rendered.contains("visible"));
        assert!(!rendered.contains("238"));
    }

    #[tokio::test(start_paused = true)]
    async fn rotator_rotates_on_interval_and_stops_on_cancel() {
        let keys = Arc::new(KeyManager::new(key("k1")));
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::ManualClock::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_rotator(
            Arc::clone(&keys),
            clock,
            Duration::from_secs(60),
            Duration::from_secs(30),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_ne!(keys.current_key().id(), "k1");

        cancel.cancel();
        handle.await.unwrap();
    }
}
