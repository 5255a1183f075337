use crate::config::PollConfig;
use std::time::Duration;

/// How often to query a mobile-money push and for how long.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use till::application::poller::PollPolicy;
///
/// let policy = PollPolicy::new()
///     .with_interval(Duration::from_secs(2))
///     .with_max_wait(Duration::from_secs(60));
/// assert_eq!(policy.schedule().next(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first query.
    interval: Duration,
    /// Upper bound for a single delay once backoff kicks in.
    max_interval: Duration,
    /// Growth factor applied to the delay after each query (1.0 = fixed).
    backoff_multiplier: f64,
    /// Total waiting time after which the push is abandoned.
    max_wait: Duration,
}

impl PollPolicy {
    /// Defaults: 3s interval, 1.5x backoff capped at 15s, 2 minute budget.
    pub const fn new() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(15),
            backoff_multiplier: 1.5,
            max_wait: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub const fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// The sequence of delays to sleep before each query.
    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            policy: *self,
            waited: Duration::ZERO,
            next_delay: self.interval,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self::new()
            .with_interval(Duration::from_millis(config.interval_ms))
            .with_max_interval(Duration::from_millis(config.max_interval_ms))
            .with_backoff_multiplier(config.backoff_multiplier)
            .with_max_wait(Duration::from_millis(config.max_wait_ms))
    }
}

/// Delays between queries, ending once the wait budget is spent.
///
/// The last delay is trimmed so the delays never sum past `max_wait`.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    policy: PollPolicy,
    waited: Duration,
    next_delay: Duration,
}

impl Iterator for PollSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.policy.max_wait.saturating_sub(self.waited);
        if remaining.is_zero() || self.next_delay.is_zero() {
            return None;
        }
        let delay = self.next_delay.min(remaining);
        self.waited += delay;

        let cap = self.policy.max_interval.max(self.policy.interval);
        let factor = self.policy.backoff_multiplier.max(1.0);
        let grown = Duration::try_from_secs_f64(self.next_delay.as_secs_f64() * factor)
            .unwrap_or(cap);
        self.next_delay = grown.min(cap);
        Some(delay)
    }
}
