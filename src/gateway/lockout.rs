//! Per-principal failure lockout.
//!
//! Failed attempts are kept as timestamps in a sliding window. Once a principal
//! has `max_failures` failures inside `window`, every further attempt for it is
//! rejected until the oldest counted failure ages out, whether or not the
//! submitted credentials are correct.
//!
//! Attempts still being evaluated hold a slot from [`LockoutTracker::begin`]
//! until they settle, and count toward the threshold. Parallel guesses
//! therefore cannot all slip past the check before the first failure lands.
//!
//! Unknown principals are tracked the same way as known ones so lockout
//! behaviour does not reveal which identifiers exist.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, Default)]
struct Attempts {
    failures: VecDeque<u64>,
    in_flight: usize,
}

/// Sliding-window failure counter keyed by principal identifier.
pub struct LockoutTracker {
    entries: DashMap<String, Attempts>,
    max_failures: usize,
    window: u64,
    enabled: bool,
}

impl LockoutTracker {
    /// Lock a principal after `max_failures` failures within `window`.
    #[must_use]
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_failures: max_failures.max(1) as usize,
            window: window.as_secs().max(1),
            enabled: true,
        }
    }

    /// A tracker that never locks.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(u32::MAX, Duration::from_secs(1))
        }
    }

    /// Reserve an attempt slot for `principal_id`, or `Err(retry_after)` if
    /// counted failures plus attempts in flight already reach the threshold.
    ///
    /// The slot is released when the returned guard settles or is dropped.
    /// Dropping without [`AttemptGuard::fail`] records nothing.
    pub fn begin(&self, principal_id: &str, now: u64) -> Result<AttemptGuard<'_>, Duration> {
        let mut guard = AttemptGuard {
            tracker: self,
            principal_id: principal_id.to_string(),
            armed: false,
        };
        if !self.enabled {
            return Ok(guard);
        }
        let mut attempts = self.entries.entry(principal_id.to_string()).or_default();
        self.trim(&mut attempts.failures, now);
        if let Some(retry_after) = self.locked_for(&attempts, now) {
            return Err(retry_after);
        }
        attempts.in_flight += 1;
        guard.armed = true;
        Ok(guard)
    }

    /// `Err(retry_after)` if `principal_id` is locked at `now`.
    pub fn check(&self, principal_id: &str, now: u64) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }
        let Some(mut attempts) = self.entries.get_mut(principal_id) else {
            return Ok(());
        };
        self.trim(&mut attempts.failures, now);
        self.locked_for(&attempts, now).map_or(Ok(()), Err)
    }

    /// Count one failed attempt at `now`.
    pub fn record_failure(&self, principal_id: &str, now: u64) {
        if !self.enabled {
            return;
        }
        let mut attempts = self.entries.entry(principal_id.to_string()).or_default();
        self.push_failure(principal_id, &mut attempts, now);
    }

    /// Forget all failures for `principal_id`.
    pub fn clear(&self, principal_id: &str) {
        if let Some(mut attempts) = self.entries.get_mut(principal_id) {
            attempts.failures.clear();
        }
        self.entries
            .remove_if(principal_id, |_, attempts| attempts.in_flight == 0);
    }

    /// Failures currently counted for `principal_id` at `now`.
    #[must_use]
    pub fn failure_count(&self, principal_id: &str, now: u64) -> usize {
        self.entries.get(principal_id).map_or(0, |a| {
            a.failures.iter().filter(|ts| self.in_window(**ts, now)).count()
        })
    }

    /// Attempts for `principal_id` holding a slot right now.
    #[must_use]
    pub fn in_flight(&self, principal_id: &str) -> usize {
        self.entries.get(principal_id).map_or(0, |a| a.in_flight)
    }

    /// Drop principals with no failures left inside the window and nothing
    /// in flight.
    pub fn purge(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, attempts| {
            attempts.in_flight > 0 || attempts.failures.iter().any(|ts| self.in_window(*ts, now))
        });
        before.saturating_sub(self.entries.len())
    }

    fn locked_for(&self, attempts: &Attempts, now: u64) -> Option<Duration> {
        if attempts.failures.len() + attempts.in_flight < self.max_failures {
            return None;
        }
        let secs = match attempts.failures.front() {
            Some(oldest) if attempts.failures.len() >= self.max_failures => {
                (oldest + self.window).saturating_sub(now).max(1)
            }
            // Saturated by in-flight attempts; they settle within a lookup timeout.
            _ => 1,
        };
        Some(Duration::from_secs(secs))
    }

    fn push_failure(&self, principal_id: &str, attempts: &mut Attempts, now: u64) {
        self.trim(&mut attempts.failures, now);
        attempts.failures.push_back(now);
        if attempts.failures.len() == self.max_failures {
            warn!(principal = %principal_id, failures = attempts.failures.len(), "Principal locked out");
        }
    }

    fn release(&self, principal_id: &str) {
        if let Some(mut attempts) = self.entries.get_mut(principal_id) {
            attempts.in_flight = attempts.in_flight.saturating_sub(1);
        }
    }

    fn in_window(&self, ts: u64, now: u64) -> bool {
        ts + self.window > now
    }

    fn trim(&self, history: &mut VecDeque<u64>, now: u64) {
        while history.front().is_some_and(|ts| !self.in_window(*ts, now)) {
            history.pop_front();
        }
    }
}

/// An attempt slot reserved by [`LockoutTracker::begin`].
#[must_use = "dropping the guard releases the attempt slot immediately"]
pub struct AttemptGuard<'a> {
    tracker: &'a LockoutTracker,
    principal_id: String,
    armed: bool,
}

impl AttemptGuard<'_> {
    /// Settle as a failed attempt at `now`.
    pub fn fail(mut self, now: u64) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let mut attempts = self
            .tracker
            .entries
            .entry(self.principal_id.clone())
            .or_default();
        attempts.in_flight = attempts.in_flight.saturating_sub(1);
        self.tracker.push_failure(&self.principal_id, &mut attempts, now);
    }

    /// Settle as a success: release the slot and forget past failures.
    pub fn succeed(mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.tracker.release(&self.principal_id);
        self.tracker.clear(&self.principal_id);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.release(&self.principal_id);
        }
    }
}
