//! Wall clock driven by the tokio timer.
//!
//! Timestamps are `wall + elapsed(anchor)`, so when tokio time is paused
//! (tests) wall time advances exactly with `sleep` and `advance`.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Source of `DateTime<Utc>` timestamps.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    wall: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    /// Clock starting at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock starting at `wall`.
    #[must_use]
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            anchor: Instant::now(),
        }
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.wall + TimeDelta::from_std(self.anchor.elapsed()).unwrap_or_default()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_paused_tokio_time() {
        let clock = Clock::new();
        let start = clock.now();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!((clock.now() - start).num_milliseconds(), 1_500);
    }

    #[tokio::test(start_paused = true)]
    async fn copies_share_the_same_timeline() {
        let start = Utc::now();
        let clock = Clock::starting_at(start);
        let copy = clock;
        assert_eq!(clock.now(), start);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(copy.now(), start + TimeDelta::seconds(2));
    }
}
