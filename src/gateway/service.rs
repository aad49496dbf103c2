//! The authentication gateway: credential exchange and session verification.
//!
//! ```text
//! authenticate:
//!   Received ─throttle/lockout─▶ CredentialLookup ─▶ Verifying ─┬▶ Issuing ─▶ Issued
//!                                        │                      └▶ Denied
//!                                        └─ timeout / store down ─▶ Unavailable
//!
//! verify_session:
//!   decode (Malformed | BadSignature | Expired) ─▶ cache liveness (Revoked | SessionNotFound)
//! ```
//!
//! A failed verification is recorded against the principal before the call
//! returns, with no await in between, so a caller dropping the future cannot
//! skip the lockout counter. A token is only handed out after the cache has
//! registered it.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::audit::{self, AuditEvent};
use super::lockout::LockoutTracker;
use super::throttle::SourceThrottle;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credential::{
    CredentialStore, CredentialSubmission, CredentialVerifier, FileCredentialStore,
    InMemoryCredentialStore, StoreError,
};
use crate::error::AuthError;
use crate::keys::{KeyError, KeyManager, SigningKey};
use crate::token::{
    InMemoryTokenCache, Liveness, SessionToken, TokenCache, TokenCodec, TokenId, TokenPayload,
};

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Token to hand to the client.
    pub token: SessionToken,
    /// Token identifier (for revocation).
    pub token_id: TokenId,
    /// Authenticated principal.
    pub principal_id: String,
    /// Expiry (Unix seconds).
    pub expires_at: u64,
}

/// A principal established by a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedPrincipal {
    /// Principal identifier.
    pub principal_id: String,
    /// Token the session rides on.
    pub token_id: TokenId,
    /// Session expiry (Unix seconds).
    pub expires_at: u64,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired token cache entries.
    pub tokens: usize,
    /// Grace keys past their window.
    pub keys: usize,
    /// Principals with no failures left in the lockout window.
    pub lockouts: usize,
}

/// Outcome of a signing key rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationOutcome {
    /// Newly current key.
    pub key_id: String,
    /// Key now in its grace window.
    pub previous_key_id: String,
    /// When the previous key stops verifying (Unix seconds).
    pub grace_until: u64,
}

/// Authentication gateway service.
pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    verifier: CredentialVerifier,
    keys: Arc<KeyManager>,
    codec: TokenCodec,
    cache: Arc<dyn TokenCache>,
    lockout: LockoutTracker,
    throttle: SourceThrottle,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
    key_grace: Duration,
    store_timeout: Duration,
}

impl AuthGateway {
    /// Gateway over `store` signing with `keys`, with an in-memory token cache,
    /// the system clock, a 5-in-60s lockout and no source throttle.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, keys: Arc<KeyManager>) -> Self {
        Self {
            store,
            verifier: CredentialVerifier::new(),
            codec: TokenCodec::new(Arc::clone(&keys)),
            keys,
            cache: Arc::new(InMemoryTokenCache::new()),
            lockout: LockoutTracker::new(5, Duration::from_secs(60)),
            throttle: SourceThrottle::disabled(),
            clock: Arc::new(SystemClock),
            token_ttl: Duration::from_secs(3600),
            key_grace: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(2),
        }
    }

    /// Build everything from configuration.
    pub async fn from_config(config: &Config) -> crate::Result<Self> {
        let store: Arc<dyn CredentialStore> = match &config.credentials.file {
            Some(path) => Arc::new(FileCredentialStore::open(path).await?),
            None => Arc::new(InMemoryCredentialStore::from_principals(
                config.credentials.principals.iter().cloned(),
            )),
        };

        if config.keys.is_ephemeral() {
            warn!("No signing key configured, using an ephemeral key; tokens will not survive a restart");
        }
        let keys = Arc::new(KeyManager::new(config.keys.initial_signing_key()?));

        let lockout = if config.lockout.enabled {
            LockoutTracker::new(config.lockout.max_failures, config.lockout.window)
        } else {
            LockoutTracker::disabled()
        };
        let throttle = if config.throttle.enabled {
            SourceThrottle::new(config.throttle.requests_per_second, config.throttle.burst)
        } else {
            SourceThrottle::disabled()
        };

        Ok(Self::new(store, keys)
            .with_lockout(lockout)
            .with_throttle(throttle)
            .with_token_ttl(config.tokens.ttl)
            .with_key_grace(config.keys.grace_period)
            .with_store_timeout(config.credentials.lookup_timeout))
    }

    /// Replace the token cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the lockout policy.
    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutTracker) -> Self {
        self.lockout = lockout;
        self
    }

    /// Replace the source throttle.
    #[must_use]
    pub fn with_throttle(mut self, throttle: SourceThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Token lifetime.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Default grace window for key rotation.
    #[must_use]
    pub fn with_key_grace(mut self, grace: Duration) -> Self {
        self.key_grace = grace;
        self
    }

    /// Maximum wait for a credential lookup.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Signing keys.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Token cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn TokenCache> {
        &self.cache
    }

    /// Clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Token lifetime.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Exchange credentials for a session token.
    pub async fn authenticate(
        &self,
        submission: &CredentialSubmission,
        source: Option<IpAddr>,
    ) -> Result<IssuedSession, AuthError> {
        let principal = submission.principal_id.as_str();

        if let Err(retry_after) = self.throttle.check(source) {
            debug!(client_ip = ?source, "Source throttled");
            audit::emit(&AuditEvent::locked(None, "throttled", source));
            return Err(AuthError::RateLimited { retry_after });
        }

        let attempt = match self.lockout.begin(principal, self.clock.now()) {
            Ok(attempt) => attempt,
            Err(retry_after) => {
                debug!(principal, "Principal locked out");
                audit::emit(&AuditEvent::locked(Some(principal), "locked_out", source));
                return Err(AuthError::RateLimited { retry_after });
            }
        };

        let lookup = tokio::time::timeout(self.store_timeout, self.store.lookup(principal));
        let stored = match lookup.await {
            Ok(Ok(stored)) => Some(stored),
            Ok(Err(StoreError::NotFound)) => None,
            Ok(Err(StoreError::Unavailable(reason))) => {
                warn!(principal, error = %reason, "Credential store unavailable");
                audit::emit(&AuditEvent::unavailable(principal, "store_unavailable"));
                return Err(AuthError::Unavailable(reason));
            }
            Err(_) => {
                warn!(principal, timeout = ?self.store_timeout, "Credential lookup timed out");
                audit::emit(&AuditEvent::unavailable(principal, "store_timeout"));
                return Err(AuthError::Unavailable("credential lookup timed out".to_string()));
            }
        };

        let outcome = match &stored {
            Some(stored) if self.verifier.verify(&submission.secret, stored) => Ok(()),
            Some(_) => Err(AuthError::CredentialMismatch),
            None => {
                let _ = self.verifier.verify_dummy(&submission.secret);
                Err(AuthError::NotFound)
            }
        };
        if let Err(err) = outcome {
            attempt.fail(self.clock.now());
            debug!(principal, reason = err.reason(), "Authentication denied");
            audit::emit(&AuditEvent::denied(principal, err.reason(), source));
            return Err(err);
        }

        let issued = self
            .codec
            .issue(principal, self.clock.now(), self.token_ttl)
            .map_err(|e| {
                error!(principal, error = %e, "Token issuance failed");
                AuthError::Unavailable(e.to_string())
            })?;
        let payload = issued.payload;

        if let Err(e) = self
            .cache
            .register(payload.token_id, &payload.principal_id, payload.expires_at)
            .await
        {
            error!(principal, token_id = %payload.token_id, error = %e, "Token registration failed");
            audit::emit(&AuditEvent::unavailable(principal, "cache_register_failed"));
            return Err(AuthError::Unavailable(e.to_string()));
        }

        attempt.succeed();
        audit::emit(&AuditEvent::issued(&payload, source));
        Ok(IssuedSession {
            token: issued.token,
            token_id: payload.token_id,
            principal_id: payload.principal_id,
            expires_at: payload.expires_at,
        })
    }

    /// Verify a presented session token now.
    pub async fn verify_session(&self, token: &[u8]) -> Result<AuthenticatedPrincipal, AuthError> {
        self.verify_session_at(token, self.clock.now()).await
    }

    /// Verify a bearer string (URL-safe base64 of the token bytes).
    pub async fn verify_bearer(&self, bearer: &str) -> Result<AuthenticatedPrincipal, AuthError> {
        let token = SessionToken::from_bearer(bearer).map_err(|e| reject(e.into(), None))?;
        self.verify_session(token.as_bytes()).await
    }

    /// Verify a presented session token at `now`.
    pub async fn verify_session_at(
        &self,
        token: &[u8],
        now: u64,
    ) -> Result<AuthenticatedPrincipal, AuthError> {
        let payload = match self.codec.decode(token, now) {
            Ok(payload) => payload,
            Err(e) => return Err(reject(e.into(), None)),
        };

        let liveness = self.cache.liveness(payload.token_id, now).await.map_err(|e| {
            warn!(token_id = %payload.token_id, error = %e, "Token cache unavailable");
            AuthError::Unavailable(e.to_string())
        })?;

        match liveness {
            Liveness::Live(entry) if entry.principal_id == payload.principal_id => {
                debug!(principal = %payload.principal_id, token_id = %payload.token_id, "Session verified");
                Ok(AuthenticatedPrincipal {
                    principal_id: payload.principal_id,
                    token_id: payload.token_id,
                    expires_at: payload.expires_at,
                })
            }
            Liveness::Live(_) | Liveness::Absent => {
                Err(reject(AuthError::SessionNotFound, Some(&payload)))
            }
            Liveness::Revoked => Err(reject(AuthError::Revoked, Some(&payload))),
            Liveness::Expired => Err(reject(AuthError::Expired, Some(&payload))),
        }
    }

    /// Revoke one token. Returns whether this call revoked it.
    pub async fn revoke(&self, token_id: TokenId) -> Result<bool, AuthError> {
        let revoked = self
            .cache
            .revoke(token_id)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        audit::emit(&AuditEvent::revoked(&token_id.to_string(), revoked));
        Ok(revoked)
    }

    /// Revoke every token of `principal_id`. Returns how many were revoked.
    pub async fn revoke_principal(&self, principal_id: &str) -> Result<usize, AuthError> {
        let count = self
            .cache
            .revoke_principal(principal_id)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        audit::emit(&AuditEvent::principal_revoked(principal_id, count));
        Ok(count)
    }

    /// Rotate to `new_key`, keeping the previous key for the configured grace window.
    pub fn rotate_key(&self, new_key: SigningKey) -> Result<RotationOutcome, KeyError> {
        self.rotate_key_with_grace(new_key, self.key_grace)
    }

    /// Rotate to `new_key` with an explicit grace window.
    pub fn rotate_key_with_grace(
        &self,
        new_key: SigningKey,
        grace: Duration,
    ) -> Result<RotationOutcome, KeyError> {
        let now = self.clock.now();
        let previous_key_id = self.keys.current_key().id().to_string();
        let key_id = new_key.id().to_string();
        self.keys.rotate(new_key, grace, now)?;
        audit::emit(&AuditEvent::key_rotated(&key_id));
        Ok(RotationOutcome {
            key_id,
            previous_key_id,
            grace_until: now.saturating_add(grace.as_secs()),
        })
    }

    /// Rotate to a freshly generated key.
    pub fn rotate_generated(&self) -> Result<RotationOutcome, KeyError> {
        self.rotate_key(SigningKey::generate_random_id())
    }

    /// One maintenance pass: expired tokens, closed key windows, stale lockouts
    /// and idle throttle buckets.
    pub async fn sweep(&self) -> Result<SweepReport, AuthError> {
        let now = self.clock.now();
        let tokens = self
            .cache
            .sweep(now)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let report = SweepReport {
            tokens,
            keys: self.keys.prune(now),
            lockouts: self.lockout.purge(now),
        };
        self.throttle.retain_recent();
        if report != SweepReport::default() {
            info!(
                tokens = report.tokens,
                keys = report.keys,
                lockouts = report.lockouts,
                live = self.cache.len(),
                "Sweep complete"
            );
        }
        Ok(report)
    }
}

fn reject(err: AuthError, payload: Option<&TokenPayload>) -> AuthError {
    debug!(reason = err.reason(), error = %err, "Session rejected");
    audit::emit(&AuditEvent::session_rejected(err.reason(), payload));
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::Principal;
    use crate::token::CacheError;

    const HOUR: Duration = Duration::from_secs(3600);

    fn gateway(clock: Arc<ManualClock>) -> AuthGateway {
        let store = Arc::new(InMemoryCredentialStore::from_principals([Principal::new(
            "alice", "s3cret",
        )]));
        let keys = Arc::new(KeyManager::new(SigningKey::new("k1", vec![7; 32]).unwrap()));
        AuthGateway::new(store, keys).with_clock(clock)
    }

    #[tokio::test]
    async fn unknown_and_wrong_secret_both_count_toward_lockout() {
        let clock = Arc::new(ManualClock::new(1_000));
        let gw = gateway(Arc::clone(&clock))
            .with_lockout(LockoutTracker::new(2, Duration::from_secs(60)));

        let ghost = CredentialSubmission::new("ghost", "x");
        assert_eq!(gw.authenticate(&ghost, None).await.unwrap_err(), AuthError::NotFound);
        assert_eq!(gw.authenticate(&ghost, None).await.unwrap_err(), AuthError::NotFound);
        assert!(matches!(
            gw.authenticate(&ghost, None).await.unwrap_err(),
            AuthError::RateLimited { .. }
        ));
    }

    #[tokio::test]
    async fn success_clears_failure_history() {
        let clock = Arc::new(ManualClock::new(1_000));
        let gw = gateway(Arc::clone(&clock))
            .with_lockout(LockoutTracker::new(2, Duration::from_secs(60)));

        let wrong = CredentialSubmission::new("alice", "nope");
        let right = CredentialSubmission::new("alice", "s3cret");
        gw.authenticate(&wrong, None).await.unwrap_err();
        gw.authenticate(&right, None).await.unwrap();
        gw.authenticate(&wrong, None).await.unwrap_err();

        // one failure since the success, still below threshold
        assert!(gw.authenticate(&right, None).await.is_ok());
    }

    struct FailingCache;

    #[async_trait::async_trait]
    impl TokenCache for FailingCache {
        async fn register(&self, _: TokenId, _: &str, _: u64) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn liveness(&self, _: TokenId, _: u64) -> Result<Liveness, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn revoke(&self, _: TokenId) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn revoke_principal(&self, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn sweep(&self, _: u64) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn register_failure_returns_unavailable_and_no_token() {
        let clock = Arc::new(ManualClock::new(1_000));
        let gw = gateway(clock).with_cache(Arc::new(FailingCache));

        let result = gw
            .authenticate(&CredentialSubmission::new("alice", "s3cret"), None)
            .await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));
    }

    #[tokio::test]
    async fn register_failure_keeps_failure_history() {
        // GIVEN: threshold 2, a cache that cannot register, one prior failure
        let clock = Arc::new(ManualClock::new(1_000));
        let gw = gateway(clock)
            .with_cache(Arc::new(FailingCache))
            .with_lockout(LockoutTracker::new(2, Duration::from_secs(60)));
        let wrong = CredentialSubmission::new("alice", "nope");
        let right = CredentialSubmission::new("alice", "s3cret");
        gw.authenticate(&wrong, None).await.unwrap_err();

        // WHEN: correct credentials hit the broken cache, then another failure
        assert!(matches!(
            gw.authenticate(&right, None).await,
            Err(AuthError::Unavailable(_))
        ));
        gw.authenticate(&wrong, None).await.unwrap_err();

        // THEN: both failures still count
        assert!(matches!(
            gw.authenticate(&right, None).await,
            Err(AuthError::RateLimited { .. })
        ));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn undecodable_bearer_is_audited_as_rejected_session() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let gw = gateway(Arc::new(ManualClock::new(1_000)));
        let err = gw.verify_bearer("not base64!").await.unwrap_err();

        assert!(matches!(err, AuthError::Malformed(_)));
        assert_eq!(err.status(), crate::error::Status::InvalidSession);
        let logs = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logs.contains("session.rejected"), "{logs}");
        assert!(logs.contains("malformed"), "{logs}");
    }

    #[tokio::test]
    async fn sweep_reports_expired_tokens_and_keys() {
        let clock = Arc::new(ManualClock::new(1_000));
        let gw = gateway(Arc::clone(&clock))
            .with_token_ttl(HOUR)
            .with_key_grace(Duration::from_secs(60));
        gw.authenticate(&CredentialSubmission::new("alice", "s3cret"), None)
            .await
            .unwrap();
        gw.rotate_generated().unwrap();

        clock.advance(HOUR);
        let report = gw.sweep().await.unwrap();
        assert_eq!(report.tokens, 1);
        assert_eq!(report.keys, 1);
        assert!(gw.cache().is_empty());
    }

    #[tokio::test]
    async fn rotation_outcome_names_both_keys() {
        let clock = Arc::new(ManualClock::new(500));
        let gw = gateway(clock).with_key_grace(Duration::from_secs(600));
        let outcome = gw
            .rotate_key(SigningKey::new("k2", vec![8; 32]).unwrap())
            .unwrap();
        assert_eq!(outcome.previous_key_id, "k1");
        assert_eq!(outcome.key_id, "k2");
        assert_eq!(outcome.grace_until, 1_100);
        assert!(matches!(
            gw.rotate_key(SigningKey::new("k2", vec![8; 32]).unwrap()),
            Err(KeyError::DuplicateId(_))
        ));
    }
}
