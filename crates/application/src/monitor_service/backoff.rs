use std::time::Duration;

/// Poll-delay backoff for the audit status loop.
///
/// The delay starts at the initial cadence, doubles on every transient
/// failure (rate limiting included) up to the cap, and snaps back to the
/// initial cadence after any successful poll.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to sleep before the next poll.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Resets the delay to the initial cadence after a successful poll.
    pub fn record_success(&mut self) {
        self.current = self.initial;
    }

    /// Doubles the delay after a transient failure, capped at the maximum.
    pub fn record_transient_failure(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }
}
