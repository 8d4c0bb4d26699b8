use std::time::Duration;

/// Delay before retrying a failed metrics send.
#[derive(Clone, Debug)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// delay = max(interval * ln(errors), floor)
    ///
    /// With a zero floor the first failure retries immediately (ln 1 = 0).
    Logarithmic { interval: Duration, floor: Duration },
}

impl BackoffStrategy {
    /// Delay after `errors` consecutive failures (counted from 1).
    pub fn delay_for_errors(&self, errors: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Logarithmic { interval, floor } => {
                let factor = if errors <= 1 {
                    0.0
                } else {
                    f64::from(errors).ln()
                };
                let millis = (interval.as_millis() as f64 * factor).round() as u64;
                Duration::from_millis(millis).max(*floor)
            }
        }
    }
}
