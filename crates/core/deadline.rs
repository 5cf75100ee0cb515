//! Request deadlines threaded through every stage of a search.

use crate::error::{ProximityError, Result};
use std::time::{Duration, Instant};

/// Point in time after which a request must fail with
/// [`ProximityError::Timeout`] instead of returning partial results.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self {
            started: Instant::now(),
            at: None,
        }
    }

    /// Expires `timeout` from now, or never when `timeout` is `None`.
    pub fn after(timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: timeout.map(|t| started + t),
        }
    }

    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// The earlier of `instant` and this deadline.
    pub fn cap(&self, instant: Instant) -> Instant {
        match self.at {
            Some(at) => at.min(instant),
            None => instant,
        }
    }

    pub fn timeout_error(&self, stage: &'static str) -> ProximityError {
        ProximityError::Timeout {
            stage,
            elapsed: self.elapsed(),
        }
    }

    /// Fails with a timeout naming `stage` when the deadline has passed.
    #[inline]
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_expired() {
            return Err(self.timeout_error(stage));
        }
        Ok(())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
