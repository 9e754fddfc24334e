//! Exponential backoff shared by the exporter wrapper and the prober.
use std::time::{Duration, Instant};

/// Default delay after the first failure.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Default ceiling the delay doubles up to.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Initial and maximum delay of an exponential backoff.
///
/// `initial <= max` always holds, a `max` below `initial` is raised to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    initial: Duration,
    max: Duration,
}

impl BackoffConfig {
    /// Creates a config, clamping `max` so it is never below `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        BackoffConfig {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay after the first failure of an episode.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Upper bound of the delay.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

/// Backoff state: the delay the next failure schedules and the instant
/// before which no new attempt may be made.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    next_eligible: Option<Instant>,
}

impl Backoff {
    /// Starts at the initial delay with no window open.
    pub fn new(config: BackoffConfig) -> Self {
        Backoff {
            config,
            current: config.initial,
            next_eligible: None,
        }
    }

    /// The delay the next failure will wait for.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// The configured bounds.
    pub fn config(&self) -> BackoffConfig {
        self.config
    }

    /// The end of the open window, if any.
    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    /// Whether `now` falls inside a backoff window.
    pub fn is_throttled(&self, now: Instant) -> bool {
        self.next_eligible.is_some_and(|until| now < until)
    }

    /// Records a failure at `now`: opens a window of the current delay and
    /// doubles the delay, capped at the maximum. Returns the wait scheduled.
    pub fn on_failure(&mut self, now: Instant) -> Duration {
        let wait = self.current;
        self.next_eligible = Some(now + wait);
        self.current = self.current.saturating_mul(2).min(self.config.max);
        wait
    }

    /// Records a success: back to the initial delay, no window.
    pub fn on_success(&mut self) {
        self.current = self.config.initial;
        self.next_eligible = None;
    }

    /// Whether the state differs from a fresh one.
    pub fn is_backing_off(&self) -> bool {
        self.next_eligible.is_some() || self.current != self.config.initial
    }
}
