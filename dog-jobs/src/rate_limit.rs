use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock;

/// At most `max` claims per `window`, shared by every worker of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    /// Window length in milliseconds, at least 1
    pub fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

/// Result of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Fixed-window claim counter.
///
/// The window opens at the first claim after the previous one expired,
/// matching a store counter that is created with a TTL on first increment.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow {
    started: Option<DateTime<Utc>>,
    count: u32,
}

impl FixedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn expires_at(&self, limit: &RateLimit) -> Option<DateTime<Utc>> {
        self.started.map(|started| clock::after(started, limit.window))
    }

    /// Check whether one more claim fits in the current window
    pub fn check(&self, limit: &RateLimit, now: DateTime<Utc>) -> RateDecision {
        match self.expires_at(limit) {
            Some(expires) if expires > now && self.count >= limit.max => RateDecision::Limited {
                retry_after: clock::until(now, expires),
            },
            _ => RateDecision::Allowed,
        }
    }

    /// Count one claim, opening a new window if the previous one expired
    pub fn record(&mut self, limit: &RateLimit, now: DateTime<Utc>) {
        match self.expires_at(limit) {
            Some(expires) if expires > now => self.count += 1,
            _ => {
                self.started = Some(now);
                self.count = 1;
            }
        }
    }

    /// Claims counted in the window open at `now`
    pub fn count(&self, limit: &RateLimit, now: DateTime<Utc>) -> u32 {
        match self.expires_at(limit) {
            Some(expires) if expires > now => self.count,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_window_blocks_after_max() {
        let limit = RateLimit::new(2, Duration::from_millis(1000));
        let mut window = FixedWindow::new();
        let start = Utc::now();

        for _ in 0..2 {
            assert_eq!(window.check(&limit, start), RateDecision::Allowed);
            window.record(&limit, start);
        }
        let later = start + chrono::Duration::milliseconds(400);
        assert_eq!(
            window.check(&limit, later),
            RateDecision::Limited { retry_after: Duration::from_millis(600) }
        );
    }

    #[test]
    fn test_window_reopens_on_expiry() {
        let limit = RateLimit::new(1, Duration::from_millis(1000));
        let mut window = FixedWindow::new();
        let start = Utc::now();
        window.record(&limit, start);

        let next = start + chrono::Duration::milliseconds(1000);
        assert_eq!(window.check(&limit, next), RateDecision::Allowed);
        window.record(&limit, next);
        assert_eq!(window.count(&limit, next), 1);
    }

    proptest! {
        #[test]
        fn window_never_admits_more_than_max(max in 1u32..50, steps in proptest::collection::vec(0i64..300, 1..200)) {
            let limit = RateLimit::new(max, Duration::from_millis(1000));
            let mut window = FixedWindow::new();
            let mut now = Utc::now();
            for step in steps {
                now += chrono::Duration::milliseconds(step);
                if window.check(&limit, now) == RateDecision::Allowed {
                    window.record(&limit, now);
                }
                prop_assert!(window.count(&limit, now) <= max);
            }
        }
    }
}
