//! Exponential backoff shared by the request executor and the live channel.
//!
//! `delay = uniform(0, min(ceiling, base * 2^attempt))`
//!
//! The policy itself is pure; randomness comes from the caller's RNG so tests
//! can pin the jitter with a seed.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Retry / reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0 before jitter. Default: 1s.
    pub base: Duration,
    /// Upper bound on any delay. Default: 30s.
    pub ceiling: Duration,
    /// Spread delays uniformly over `[0, delay]`. Default: on.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            jitter: true,
        }
    }

    pub fn without_jitter(self) -> Self {
        Self {
            jitter: false,
            ..self
        }
    }

    /// The un-jittered envelope: `min(ceiling, base * 2^attempt)`.
    pub fn ceiling_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(31);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }

    /// Delay to wait after `attempt` failed.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.ceiling_delay(attempt);
        if !self.jitter || capped.is_zero() {
            return capped;
        }

        let max_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }

    /// Like [`delay`](Self::delay), but never shorter than a server-provided
    /// `Retry-After` hint. The ceiling still applies.
    pub fn delay_with_hint<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        hint: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let computed = self.delay(attempt, rng);
        hint.map_or(computed, |h| computed.max(h).min(self.ceiling))
    }
}

/// RNG for one retry loop: seeded when reproducible jitter is wanted,
/// entropy-backed otherwise.
pub fn jitter_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}
