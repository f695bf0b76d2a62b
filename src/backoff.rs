//! Reconnect delay policy: exponential backoff with full-second jitter.
//!
//! DESIGN
//! ======
//! The very first retry after a failure waits only a random fraction of a
//! second, so a fleet of clients dropped by the same server restart does not
//! reconnect in lockstep. Every later retry waits `base + jitter` and doubles
//! `base` up to the configured ceiling. A successful open calls [`reset`].
//!
//! The policy is a plain state machine over an injected `RngCore`, so tests
//! drive it with a fixed source instead of the OS RNG.
//!
//! [`reset`]: BackoffPolicy::reset

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

pub const DEFAULT_MIN_BACKOFF_SECS: f64 = 1.0;
pub const DEFAULT_MAX_BACKOFF_SECS: f64 = 32.0;
/// Largest ceiling a policy accepts (one day). Larger values are clamped.
pub const MAX_BACKOFF_CEILING_SECS: f64 = 86_400.0;

/// Floor and ceiling for the exponential base, in seconds.
///
/// A floor of zero never grows: every delay is then jitter alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffBounds {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl Default for BackoffBounds {
    fn default() -> Self {
        Self { min_secs: DEFAULT_MIN_BACKOFF_SECS, max_secs: DEFAULT_MAX_BACKOFF_SECS }
    }
}

/// Observable reconnect state, used for logging and equality checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectContext {
    pub attempt: u32,
    pub current_backoff_secs: f64,
    pub min_backoff_secs: f64,
    pub max_backoff_secs: f64,
}

pub struct BackoffPolicy<R = StdRng> {
    attempt: u32,
    current_secs: f64,
    bounds: BackoffBounds,
    rng: R,
}

impl BackoffPolicy<StdRng> {
    /// Policy seeded from the operating system RNG.
    #[must_use]
    pub fn new(bounds: BackoffBounds) -> Self {
        Self::with_rng(bounds, StdRng::from_os_rng())
    }
}

impl<R: RngCore> BackoffPolicy<R> {
    /// Policy drawing jitter from `rng`.
    ///
    /// Negative floors are raised to zero, a ceiling below the floor is
    /// raised to the floor, and both are capped at
    /// [`MAX_BACKOFF_CEILING_SECS`], so `current <= max` holds from
    /// construction on and every delay fits in a `Duration`.
    pub fn with_rng(bounds: BackoffBounds, rng: R) -> Self {
        let min_secs = bounds.min_secs.max(0.0).min(MAX_BACKOFF_CEILING_SECS);
        let max_secs = bounds.max_secs.max(min_secs).min(MAX_BACKOFF_CEILING_SECS);
        Self { attempt: 0, current_secs: min_secs, bounds: BackoffBounds { min_secs, max_secs }, rng }
    }

    /// Delay before the next reconnect attempt. Advances the policy.
    ///
    /// The result is always in `[0, max + 1)` seconds.
    pub fn next_delay(&mut self) -> Duration {
        let jitter: f64 = self.rng.random();
        let secs = if self.attempt == 0 {
            jitter
        } else {
            let secs = self.current_secs + jitter;
            self.current_secs = (self.current_secs * 2.0).min(self.bounds.max_secs);
            secs
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Return to the freshly constructed state.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_secs = self.bounds.min_secs;
    }

    /// Number of delays handed out since construction or the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn context(&self) -> ReconnectContext {
        ReconnectContext {
            attempt: self.attempt,
            current_backoff_secs: self.current_secs,
            min_backoff_secs: self.bounds.min_secs,
            max_backoff_secs: self.bounds.max_secs,
        }
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
