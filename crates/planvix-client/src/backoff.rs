//! Reconnect delay.

use std::time::Duration;

/// Default first delay.
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(1);
/// Default upper bound.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);
/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Multiplicative backoff between `floor` and `ceiling`.
///
/// Successive [`next_delay`](Self::next_delay) calls are non-decreasing and
/// never exceed the ceiling. [`reset`](Self::reset) returns to the floor.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    /// A backoff starting at `floor`. A ceiling below the floor is raised to
    /// it; a factor below 1 (or NaN) is treated as 1.
    pub fn new(floor: Duration, ceiling: Duration, factor: f64) -> Self {
        let factor = if factor >= 1.0 { factor } else { 1.0 };
        Self {
            floor,
            ceiling: ceiling.max(floor),
            factor,
            current: floor,
        }
    }

    /// Delay to wait now; grows the delay for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
            .map_or(self.ceiling, |grown| grown.max(delay).min(self.ceiling));
        delay
    }

    /// Back to the floor, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) returns.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Smallest delay.
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Largest delay.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR, DEFAULT_CEILING, DEFAULT_FACTOR)
    }
}
