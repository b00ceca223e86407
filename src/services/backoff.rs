use std::time::Duration;

use rand::Rng;

/// Exponential reconnect delay with bounded random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_jitter: Duration,
}

impl BackoffPolicy {
    /// `min(max, base * 2^(attempt-1))`; attempt 0 is treated as 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Base delay plus an explicit jitter, clamped to `max_jitter`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        self.base_delay(attempt) + jitter.min(self.max_jitter)
    }

    /// Base delay plus a uniformly random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }
}

/// Consecutive-failure counts at which a channel is reported as degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warn: u32,
    pub failsafe: u32,
}

impl Thresholds {
    pub fn classify(&self, failures: u32) -> Degradation {
        if failures >= self.failsafe {
            Degradation::Failsafe
        } else if failures >= self.warn {
            Degradation::Unstable
        } else {
            Degradation::Healthy
        }
    }
}

/// How badly a sync channel is failing, in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Degradation {
    #[default]
    Healthy,
    /// Past the warn threshold; retries continue silently.
    Unstable,
    /// Past the failsafe threshold; the poll loop is the primary channel.
    Failsafe,
}

/// Per-channel consecutive failure counter.
///
/// Only reports a level when it changes, so callers alert once per level.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    thresholds: Thresholds,
    failures: u32,
    level: Degradation,
}

impl FailureTracker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            failures: 0,
            level: Degradation::Healthy,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure; returns the new level if it changed.
    pub fn record_failure(&mut self) -> Option<Degradation> {
        self.failures = self.failures.saturating_add(1);
        self.update()
    }

    /// Reset after a success; returns `Healthy` if the channel recovered.
    pub fn record_success(&mut self) -> Option<Degradation> {
        self.failures = 0;
        self.update()
    }

    fn update(&mut self) -> Option<Degradation> {
        let level = self.thresholds.classify(self.failures);
        if level == self.level {
            return None;
        }
        self.level = level;
        Some(level)
    }
}
