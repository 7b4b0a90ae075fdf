use std::time::{Duration, Instant};

/// Hard response deadline of a single AI request.
///
/// The watchdog is re-armed for every request. It reports the request as
/// overdue once strictly more than the hard limit has elapsed, and sizes the
/// waits between checks so that no check lands later than the deadline.
#[derive(Clone, Copy, Debug)]
pub struct Watchdog {
    hard_limit: Duration,
    check_interval: Duration,
    armed_at: Option<Instant>,
}

impl Watchdog {
    /// Creates a disarmed watchdog.
    ///
    /// Checks run every `max(execution_limit, hard_limit / 2)`.
    #[must_use]
    pub fn new(execution_limit: Duration, hard_limit: Duration) -> Self {
        Self {
            hard_limit,
            check_interval: execution_limit.max(hard_limit / 2),
            armed_at: None,
        }
    }

    /// Hard wall-clock cap of every request.
    #[must_use]
    pub const fn hard_limit(&self) -> Duration {
        self.hard_limit
    }

    /// Interval between two consecutive checks.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Starts timing a new request.
    pub fn arm(&mut self, now: Instant) {
        self.armed_at = Some(now);
    }

    /// Stops timing.
    pub fn disarm(&mut self) {
        self.armed_at = None;
    }

    /// Reports whether a request is being timed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Reports whether the timed request exceeded the hard limit.
    #[must_use]
    pub fn is_overdue(&self, now: Instant) -> bool {
        self.armed_at
            .map_or(false, |armed_at| now.saturating_duration_since(armed_at) > self.hard_limit)
    }

    /// How long to wait for a response before checking again.
    #[must_use]
    pub fn next_wait(&self, now: Instant) -> Duration {
        let Some(armed_at) = self.armed_at else {
            return self.check_interval;
        };
        let remaining = self
            .hard_limit
            .saturating_sub(now.saturating_duration_since(armed_at));
        self.check_interval
            .min(remaining + Duration::from_millis(1))
    }
}
