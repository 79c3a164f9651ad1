//! Sliding-window rate limiter.
//!
//! Keeps the timestamps of recently admitted calls and admits a new call only
//! while fewer than `limit` of them fall inside the trailing `interval`. This is
//! an approximate limiter: up to `limit` calls may land on either side of a
//! window boundary.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::SchedulerError;
use crate::util::clock::{Clock, Timestamp};

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call was admitted and recorded in the window.
    Admitted {
        /// Admissions still available in the current window.
        remaining: u32,
    },
    /// The window is full.
    Rejected {
        /// Time until the oldest admission leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the call was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Count-per-interval admission gate over a trailing time window.
pub struct SlidingWindowRateLimiter {
    limit: u32,
    interval: Duration,
    clock: Arc<dyn Clock>,
    window: Mutex<VecDeque<Timestamp>>,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter admitting at most `limit` calls per `interval`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] when `limit` is zero or `interval`
    /// is shorter than one millisecond.
    pub fn new(
        limit: u32,
        interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        if limit == 0 {
            return Err(SchedulerError::InvalidArgument(
                "rate limit must be greater than 0".into(),
            ));
        }
        if interval.as_millis() == 0 {
            return Err(SchedulerError::InvalidArgument(
                "rate interval must be at least 1ms".into(),
            ));
        }
        Ok(Self {
            limit,
            interval,
            clock,
            window: Mutex::new(VecDeque::with_capacity(limit as usize)),
        })
    }

    /// Admit the call if the window has room.
    pub fn try_acquire(&self) -> bool {
        self.check().is_admitted()
    }

    /// Admission check reporting the remaining budget or the wait until the
    /// next slot opens.
    pub fn check(&self) -> Admission {
        let now = self.clock.now();
        let mut window = self.window.lock();
        self.prune(&mut window, now);

        if window.len() < self.limit as usize {
            window.push_back(now);
            let remaining = self.limit as usize - window.len();
            Admission::Admitted {
                remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            }
        } else {
            let retry_after = window
                .front()
                .map_or(Duration::ZERO, |oldest| self.time_until_expiry(*oldest, now));
            debug!(limit = self.limit, ?retry_after, "rate limit reached");
            Admission::Rejected { retry_after }
        }
    }

    /// Wait through the clock until a call is admitted.
    pub async fn acquire(&self) {
        loop {
            match self.check() {
                Admission::Admitted { .. } => return,
                Admission::Rejected { retry_after } => {
                    self.clock.after(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Admissions still available right now, without recording one.
    pub fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut window = self.window.lock();
        self.prune(&mut window, now);
        let free = (self.limit as usize).saturating_sub(window.len());
        u32::try_from(free).unwrap_or(u32::MAX)
    }

    /// Configured admissions per interval.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Configured window length.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    fn prune(&self, window: &mut VecDeque<Timestamp>, now: Timestamp) {
        let cutoff = now.saturating_sub(self.interval.as_millis());
        while window.front().is_some_and(|stamp| *stamp < cutoff) {
            window.pop_front();
        }
    }

    fn time_until_expiry(&self, oldest: Timestamp, now: Timestamp) -> Duration {
        // `oldest` is pruned once `now - interval` moves strictly past it.
        let expires_at = oldest + self.interval.as_millis() + 1;
        let wait = expires_at.saturating_sub(now);
        Duration::from_millis(u64::try_from(wait).unwrap_or(u64::MAX))
    }
}

impl std::fmt::Debug for SlidingWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("limit", &self.limit)
            .field("interval", &self.interval)
            .field("in_window", &self.window.lock().len())
            .finish()
    }
}
