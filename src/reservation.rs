//! The decision record returned from every admission check.

use std::time::{Duration, SystemTime};

/// Outcome of accounting an event against a key's quota.
///
/// Returned from both admitted and rejected decisions — `allowed` lives
/// alongside it rather than being folded into an error, since a logical
/// rejection is not a failure (see [`crate::error::RateLimitError`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    /// Current usage after this event was accounted for.
    pub req: f64,
    /// Configured capacity (quota for window algorithms, bucket size for leaky-bucket).
    pub bucket: i64,
    /// Earliest instant at which a unit-weight retry would be admitted.
    pub time_to_act: SystemTime,
    /// Reference instant at which this state is valid; leaky-bucket computes future leak from it.
    pub last: SystemTime,
}

impl Reservation {
    /// How long a caller would need to wait, measured from `now`.
    ///
    /// Zero if `time_to_act` has already passed.
    pub fn delay(&self, now: SystemTime) -> Duration {
        self.time_to_act
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_zero_once_time_to_act_has_passed() {
        let now = SystemTime::now();
        let r = Reservation {
            req: 1.0,
            bucket: 10,
            time_to_act: now - Duration::from_secs(5),
            last: now,
        };
        assert_eq!(r.delay(now), Duration::ZERO);
    }

    #[test]
    fn delay_reports_the_remaining_wait() {
        let now = SystemTime::now();
        let r = Reservation {
            req: 10.0,
            bucket: 10,
            time_to_act: now + Duration::from_secs(3),
            last: now,
        };
        assert_eq!(r.delay(now), Duration::from_secs(3));
    }
}
