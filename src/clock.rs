//! Wall-clock sources used to timestamp persisted records.

use time::OffsetDateTime;
use tokio::time::Instant;

/// Source of wall-clock milliseconds shared by every tab of a storage domain.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Reads the operating-system clock. Tabs in separate processes agree on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        unix_millis(OffsetDateTime::now_utc())
    }
}

/// Wall clock anchored once and advanced by the tokio clock.
///
/// Under a paused tokio runtime this clock only moves when tokio time moves,
/// so lock ages and handoff waits stay consistent with each other.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch_ms: i64,
    origin: Instant,
}

impl TokioClock {
    /// Anchor a new clock at the current system time.
    pub fn new() -> Self {
        Self {
            epoch_ms: unix_millis(OffsetDateTime::now_utc()),
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let before = clock.now_ms();

        tokio::time::advance(Duration::from_millis(1_500)).await;

        assert_eq!(clock.now_ms() - before, 1_500);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
