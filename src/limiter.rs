//! The uniform `Limiter` capability (§4.1) and its two compositions.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::algorithm::{leaky_bucket, next_window_boundary};
use crate::error::{RateLimitError, RateLimitResult};
use crate::reservation::Reservation;
use crate::store::{CounterStore, RateStore};

/// Admission decision capability: account an event, or force a reset.
///
/// `allow` is `Ok` for both admitted and rejected events — rejection is
/// signalled through the returned `bool`, not through `Err`. `Err` is
/// reserved for transport/storage failures (§7).
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn allow(&self, key: &str, weight: i64) -> RateLimitResult<(Reservation, bool)>;

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()>;
}

/// Fixed-window (or, backed by a rolling-window store, sliding-window)
/// counter limiter (§4.3/§4.4).
///
/// Generic over any [`CounterStore`] — the rolling-window algorithm is a
/// store variant of this same limiter, not a distinct limiter type, which
/// is why `time_to_act` on rejection always uses the fixed-window boundary
/// formula even when `S` is the rolling store (preserved literally from
/// the source, which shares one `Limiter` across both store kinds).
pub struct FixedWindowLimiter<S: CounterStore> {
    window_time: Duration,
    quota: i64,
    store: S,
}

impl<S: CounterStore> FixedWindowLimiter<S> {
    pub fn new(window_time: Duration, quota: i64, store: S) -> Self {
        Self {
            window_time,
            quota,
            store,
        }
    }
}

#[async_trait]
impl<S: CounterStore> Limiter for FixedWindowLimiter<S> {
    async fn allow(&self, key: &str, weight: i64) -> RateLimitResult<(Reservation, bool)> {
        let now = SystemTime::now();
        let new_val = self.store.incr(key, weight, now).await?;

        if new_val > self.quota {
            Ok((
                Reservation {
                    req: self.quota as f64,
                    bucket: self.quota,
                    time_to_act: next_window_boundary(now, self.window_time),
                    last: now,
                },
                false,
            ))
        } else {
            Ok((
                Reservation {
                    req: new_val as f64,
                    bucket: self.quota,
                    time_to_act: now,
                    last: now,
                },
                true,
            ))
        }
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        self.store.reset(key, value).await
    }
}

/// Leaky-bucket limiter (§4.2), composing a [`RateStore`] with the pure
/// [`leaky_bucket::step`] policy.
pub struct LeakyBucketLimiter<S: RateStore> {
    rate: f64,
    period: Duration,
    bucket: i64,
    store: S,
}

impl<S: RateStore> LeakyBucketLimiter<S> {
    /// `rate > 0` and `floor(rate) <= bucket` are required; both are
    /// programmer errors surfaced synchronously rather than at first use.
    pub fn new(rate: f64, period: Duration, bucket: i64, store: S) -> RateLimitResult<Self> {
        if rate <= 0.0 {
            return Err(RateLimitError::config("rate must be positive"));
        }
        if rate.floor() as i64 > bucket {
            return Err(RateLimitError::config("bucket is smaller than the rate"));
        }
        Ok(Self {
            rate,
            period,
            bucket,
            store,
        })
    }
}

#[async_trait]
impl<S: RateStore> Limiter for LeakyBucketLimiter<S> {
    async fn allow(&self, key: &str, weight: i64) -> RateLimitResult<(Reservation, bool)> {
        let now = SystemTime::now();
        let (rate, period, bucket) = (self.rate, self.period, self.bucket);
        let policy = move |remain: f64, last: SystemTime, now: SystemTime, w: i64| {
            leaky_bucket::step(rate, period, bucket, remain, last, now, w)
        };

        match self.store.incr(key, weight, now, &policy).await {
            Ok(r) => Ok((r, true)),
            Err(RateLimitError::LimitReached(r)) => Ok((r, false)),
            Err(e) => Err(e),
        }
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        self.store.reset(key, value).await
    }
}
