//! Reconnect delay scheduling and attempt budgets.
//!
//! The scheduler produces the inter-attempt delay sequence for the reconnect
//! task: constant at the initial delay, or multiplicative growth clamped at a
//! ceiling when exponential backoff is enabled. It also answers whether the
//! retry budget for the current phase (startup vs steady-state) is spent.

use std::time::Duration;

/// A retry budget of `-1` means never give up.
pub const UNLIMITED: i32 = -1;

/// Configuration for reconnect backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay between attempt cycles.
    pub initial_delay: Duration,
    /// Ceiling for exponential growth.
    pub max_delay: Duration,
    /// Multiplier applied after each cycle when exponential.
    pub multiplier: f64,
    /// Whether delays grow multiplicatively.
    pub use_exponential: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            use_exponential: true,
        }
    }
}

/// Computes the reconnect delay sequence.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    current: Duration,
}

impl BackoffScheduler {
    /// Creates a scheduler positioned at the initial delay.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Returns the delay to sleep before the next attempt cycle and advances
    /// the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.config.use_exponential {
            let grown = self.current.as_millis() as f64 * self.config.multiplier;
            let clamped = grown.min(self.config.max_delay.as_millis() as f64).max(0.0);
            self.current = Duration::from_millis(clamped as u64);
        }
        delay
    }

    /// Restores the sequence to the initial delay, called on every
    /// successful connect.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn current_delay(&self) -> Duration {
        self.current
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Selects the applicable attempt limit for the current connection phase.
///
/// Startup attempts (before any connection ever succeeded) may carry their
/// own budget; once a connection has succeeded the steady-state budget
/// applies. [`UNLIMITED`] disables the limit for either phase.
pub fn attempt_limit(
    first_connection: bool,
    startup_max_attempts: i32,
    max_attempts: i32,
) -> i32 {
    if first_connection && startup_max_attempts != UNLIMITED {
        startup_max_attempts
    } else {
        max_attempts
    }
}

/// True when `failures` consecutive failed cycles have exhausted `limit`.
pub fn budget_exhausted(failures: u32, limit: i32) -> bool {
    limit != UNLIMITED && failures >= limit as u32
}
