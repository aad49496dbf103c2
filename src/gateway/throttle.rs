//! Per-source request throttle (token bucket keyed by client address).
//!
//! Runs before any credential lookup, so a flood from one address costs no
//! store round-trips. Requests without a known source address share one bucket.

use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Bucket used for requests with no source address.
const UNKNOWN_SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Token-bucket throttle per client address.
pub struct SourceThrottle {
    limiter: Option<KeyedLimiter>,
    clock: DefaultClock,
}

impl SourceThrottle {
    /// `requests_per_second` sustained, `burst` at once.
    #[must_use]
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Some(RateLimiter::keyed(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// A throttle that admits everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            limiter: None,
            clock: DefaultClock::default(),
        }
    }

    /// `Err(retry_after)` when `source` has exhausted its bucket.
    pub fn check(&self, source: Option<IpAddr>) -> Result<(), Duration> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let key = source.unwrap_or(UNKNOWN_SOURCE);
        limiter
            .check_key(&key)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Forget buckets that have fully refilled.
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn tracked_sources(&self) -> usize {
        self.limiter.as_ref().map_or(0, |l| l.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[test]
    fn burst_then_reject() {
        // GIVEN: 1 rps with a burst of 3
        let throttle = SourceThrottle::new(1, 3);

        // THEN: three immediate requests pass, the fourth waits
        for _ in 0..3 {
            assert!(throttle.check(ip(1)).is_ok());
        }
        let retry = throttle.check(ip(1)).unwrap_err();
        assert!(retry <= Duration::from_secs(1));
    }

    #[test]
    fn sources_have_separate_buckets() {
        let throttle = SourceThrottle::new(1, 1);
        assert!(throttle.check(ip(1)).is_ok());
        assert!(throttle.check(ip(1)).is_err());
        assert!(throttle.check(ip(2)).is_ok());
        assert_eq!(throttle.tracked_sources(), 2);
    }

    #[test]
    fn unknown_sources_share_a_bucket() {
        let throttle = SourceThrottle::new(1, 1);
        assert!(throttle.check(None).is_ok());
        assert!(throttle.check(None).is_err());
    }

    #[test]
    fn disabled_admits_everything() {
        let throttle = SourceThrottle::disabled();
        for _ in 0..1000 {
            assert!(throttle.check(ip(1)).is_ok());
        }
        assert_eq!(throttle.tracked_sources(), 0);
    }
}
