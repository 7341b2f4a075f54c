//! Store contracts shared by every algorithm.
//!
//! `CounterStore` backs fixed-window and rolling-window limiters;
//! `RateStore` backs the leaky-bucket limiter and hands its per-key
//! critical section to a caller-supplied policy callback.

pub mod memory_counter;
pub mod memory_rate;
pub mod memory_rolling;
#[cfg(feature = "redis-store")]
pub mod redis_rate;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RateLimitResult;
use crate::reservation::Reservation;

/// Per-key state for leaky-bucket stores, serialised as JSON for Redis.
///
/// Field names are part of the wire contract and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateData {
    #[serde(rename = "Remain")]
    pub remain: f64,
    #[serde(rename = "LastSec")]
    pub last_sec: i64,
    #[serde(rename = "LastNSec")]
    pub last_nsec: i64,
}

impl RateData {
    pub fn new(remain: f64, last: SystemTime) -> Self {
        let (last_sec, last_nsec) = split_system_time(last);
        Self {
            remain,
            last_sec,
            last_nsec,
        }
    }

    pub fn last(&self) -> SystemTime {
        join_system_time(self.last_sec, self.last_nsec)
    }
}

fn split_system_time(t: SystemTime) -> (i64, i64) {
    match t.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos() as i64),
        Err(e) => {
            let d = e.duration();
            (-(d.as_secs() as i64), -(d.subsec_nanos() as i64))
        }
    }
}

fn join_system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        std::time::UNIX_EPOCH + std::time::Duration::new(secs as u64, nsecs.max(0) as u32)
    } else {
        std::time::UNIX_EPOCH - std::time::Duration::new((-secs) as u64, (-nsecs).max(0) as u32)
    }
}

/// A pure policy function executed inside a `RateStore`'s per-key critical section.
///
/// Takes `(remain, last, now, weight)` and returns the new reservation, or
/// `Err(RateLimitError::LimitReached(reservation))` when the policy denies
/// admission — the store must not persist the key's state in that case.
pub type PolicyFn<'a> =
    dyn Fn(f64, SystemTime, SystemTime, i64) -> RateLimitResult<Reservation> + Send + Sync + 'a;

/// Atomic read-modify-write counter store backing fixed/rolling window limiters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by `weight` at `now`, returning the new counter value.
    async fn incr(&self, key: &str, weight: i64, now: SystemTime) -> RateLimitResult<i64>;

    /// Force `key`'s counter to `value`.
    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()>;
}

/// Atomic read-modify-write store backing the leaky-bucket limiter.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Load `key`'s `(remain, last)`, run `policy` under the per-key lock,
    /// persist the result if admitted, and return it either way.
    async fn incr(
        &self,
        key: &str,
        weight: i64,
        now: SystemTime,
        policy: &PolicyFn<'_>,
    ) -> RateLimitResult<Reservation>;

    /// Force `key`'s state to `RateData::new(value as f64, now)`.
    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()>;
}
