//! Liveness watchdog. Only explicit feeds reset the deadline.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    last_feed: Instant,
    tripped: bool,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Instant::now(),
            tripped: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Reset the deadline. Returns true if this feed clears a trip.
    pub fn feed(&mut self, now: Instant) -> bool {
        self.last_feed = now;
        std::mem::replace(&mut self.tripped, false)
    }

    /// When the next trip is due, or `None` while tripped.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.tripped).then(|| self.last_feed + self.timeout)
    }

    /// Returns true exactly once per trip, on the first check at or past
    /// the deadline.
    pub fn check(&mut self, now: Instant) -> bool {
        if self.tripped || now.saturating_duration_since(self.last_feed) < self.timeout {
            return false;
        }
        self.tripped = true;
        true
    }
}
