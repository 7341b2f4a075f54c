//! The leaky-bucket admission policy (§4.2).

use std::time::{Duration, SystemTime};

use crate::error::{RateLimitError, RateLimitResult};
use crate::reservation::Reservation;

/// Account `weight` units against a leaky bucket of `(remain, last)` state.
///
/// Returns `Ok(reservation)` on admission (the caller persists `req`/`last`
/// from it) or `Err(RateLimitError::LimitReached(reservation))` on
/// rejection, in which case the caller must leave the persisted state
/// untouched — `last` does not advance.
pub fn step(
    rate: f64,
    period: Duration,
    bucket: i64,
    remain: f64,
    last: SystemTime,
    now: SystemTime,
    weight: i64,
) -> RateLimitResult<Reservation> {
    // Clock regression: treat as a fresh event rather than denying service.
    if now < last {
        return Ok(Reservation {
            req: weight as f64,
            bucket,
            time_to_act: now,
            last: now,
        });
    }

    let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
    let leak = rate * elapsed.as_secs_f64() / period.as_secs_f64();
    let current = (remain - leak).max(0.0) + weight as f64;

    if current > bucket as f64 {
        let excess = current - bucket as f64;
        let drain = Duration::from_secs_f64((excess / rate) * period.as_secs_f64());
        return Err(RateLimitError::LimitReached(Reservation {
            req: bucket as f64,
            bucket,
            time_to_act: now + drain,
            last, // unchanged: rejection never advances `last`
        }));
    }

    Ok(Reservation {
        req: current,
        bucket,
        time_to_act: now,
        last: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: u64) -> SystemTime {
        std::time::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn admits_below_capacity() {
        let r = step(1.0, Duration::from_secs(1), 5, 0.0, t(0), t(0), 1).unwrap();
        assert_eq!(r.req, 1.0);
        assert_eq!(r.last, t(0));
        assert_eq!(r.time_to_act, t(0));
    }

    #[test]
    fn rejects_over_capacity_and_freezes_last() {
        let err = step(1.0, Duration::from_secs(1), 5, 5.0, t(0), t(0), 1).unwrap_err();
        let r = err.reservation().unwrap();
        assert_eq!(r.req, 5.0);
        assert_eq!(r.last, t(0));
        assert!(r.time_to_act > t(0));
    }

    #[test]
    fn leaks_continuously_between_accesses() {
        // rate=1/s, 5s elapsed since last => 5 units leaked out.
        let r = step(1.0, Duration::from_secs(1), 5, 5.0, t(0), t(5), 1).unwrap();
        assert_eq!(r.req, 1.0);
        assert_eq!(r.last, t(5));
    }

    #[test]
    fn clock_regression_admits_without_advancing_state() {
        let r = step(1.0, Duration::from_secs(1), 5, 4.0, t(10), t(5), 1).unwrap();
        assert_eq!(r.req, 1.0);
        assert_eq!(r.last, t(5));
    }
}
