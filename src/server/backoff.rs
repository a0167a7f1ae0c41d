//! Retry pacing for failed `accept()` calls.

use std::time::Duration;

/// Exponential back-off applied when a listener's `accept()` fails.
///
/// The first retry waits `initial_delay`; each further consecutive failure
/// doubles the wait up to `max_delay`. A successful accept resets the delay.
///
/// # Default Values
/// - `initial_delay`: 10 milliseconds
/// - `max_delay`: 1 second
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the wait.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp both delays to at least one millisecond and order them so
    /// `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use wiresession::server::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::ZERO,
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(self) -> Self {
        let floor = Duration::from_millis(1);
        let a = self.initial_delay.max(floor);
        let b = self.max_delay.max(floor);
        Self {
            initial_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    /// Delay to use after a failure that waited `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { current.saturating_mul(2).min(self.max_delay) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(5, 20, 10)]
    #[case(15, 20, 20)]
    #[case(20, 20, 20)]
    fn next_delay_doubles_up_to_cap(#[case] current: u64, #[case] max: u64, #[case] expected: u64) {
        let cfg = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(max),
        };
        assert_eq!(
            cfg.next_delay(Duration::from_millis(current)),
            Duration::from_millis(expected)
        );
    }

    #[test]
    fn normalized_keeps_valid_config() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.normalized(), cfg);
    }
}
