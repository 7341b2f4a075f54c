//! Redis-backed leaky-bucket rate store using watched optimistic
//! transactions, with an optional in-memory fallback (§4.6).

use std::time::SystemTime;

use async_trait::async_trait;
use deadpool_redis::{redis, Pool};
use tracing::{trace, warn};

use crate::error::{RateLimitError, RateLimitResult};
use crate::reservation::Reservation;
use crate::store::{PolicyFn, RateData, RateStore};

/// Default bounded retry count when the caller doesn't specify one.
pub const DEFAULT_NUM_RETRY: u32 = 4;

/// Leaky-bucket store sharing state across processes via Redis.
///
/// Each [`RateStore::incr`] call runs the WATCH / read / policy / pipelined
/// SET protocol described in §4.6, retrying up to `num_retry` times on a
/// watch conflict. A transport failure (not a watch conflict, and not the
/// policy's own logical rejection) falls back to `fallback` if configured,
/// or denies the request outright — this store never fails open.
///
/// WATCH/MULTI/EXEC state lives on the connection, not the logical caller,
/// so the store checks a connection out of a [`Pool`] for the duration of
/// each `incr` rather than cloning a shared multiplexed handle — two
/// concurrent callers must never interleave their WATCH/GET/MULTI/EXEC
/// round trips on the same connection, or one call's MULTI can swallow
/// another's commands.
pub struct RedisRateStore<F: RateStore> {
    pool: Pool,
    ttl_secs: u64,
    num_retry: u32,
    fallback: Option<F>,
}

impl<F: RateStore> RedisRateStore<F> {
    pub fn new(
        pool: Pool,
        ttl: std::time::Duration,
        num_retry: Option<u32>,
        fallback: Option<F>,
    ) -> Self {
        Self {
            pool,
            ttl_secs: ttl.as_secs().max(1),
            num_retry: num_retry.unwrap_or(DEFAULT_NUM_RETRY),
            fallback,
        }
    }

    /// Run the watched-transaction protocol once per retry attempt, on a
    /// single connection checked out for the whole call.
    ///
    /// Returns `Ok(reservation)` on a committed admission,
    /// `Err(RateLimitError::LimitReached(reservation))` on a committed
    /// logical rejection, or another `Err` for a transport failure or
    /// retries exhausted on watch conflicts.
    async fn redis_incr(
        &self,
        key: &str,
        weight: i64,
        now: SystemTime,
        policy: &PolicyFn<'_>,
    ) -> RateLimitResult<Reservation> {
        let mut conn = self.pool.get().await?;

        for attempt in 0..self.num_retry {
            let _: () = redis::cmd("WATCH").arg(key).query_async(&mut conn).await?;

            let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            let data = match raw {
                Some(s) => serde_json::from_str::<RateData>(&s)
                    .map_err(|e| RateLimitError::store(format!("malformed rate data: {e}")))?,
                None => RateData::new(0.0, now),
            };

            let outcome = policy(data.remain, data.last(), now, weight);
            let (reservation, rejected) = match outcome {
                Ok(r) => (r, false),
                Err(RateLimitError::LimitReached(r)) => (r, true),
                Err(other) => {
                    let _: redis::RedisResult<()> =
                        redis::cmd("UNWATCH").query_async(&mut conn).await;
                    return Err(other);
                }
            };

            let new_data = RateData::new(reservation.req, reservation.last);
            let json = serde_json::to_string(&new_data)
                .map_err(|e| RateLimitError::store(format!("failed to serialise rate data: {e}")))?;

            let mut pipe = redis::pipe();
            pipe.atomic().set_ex(key, json, self.ttl_secs);
            // An aborted (watch-conflicted) transaction replies with a nil
            // array; a committed one replies with the SET's "OK".
            let committed: Option<String> = pipe.query_async(&mut conn).await?;

            match committed {
                Some(_) => {
                    trace!(key = %key, attempt = attempt, rejected = rejected, "redis leaky-bucket commit");
                    return if rejected {
                        Err(RateLimitError::LimitReached(reservation))
                    } else {
                        Ok(reservation)
                    };
                }
                None => {
                    trace!(key = %key, attempt = attempt, "redis watch conflict, retrying");
                    continue;
                }
            }
        }

        Err(RateLimitError::store("exhausted retries on watch conflict"))
    }
}

#[async_trait]
impl<F: RateStore> RateStore for RedisRateStore<F> {
    async fn incr(
        &self,
        key: &str,
        weight: i64,
        now: SystemTime,
        policy: &PolicyFn<'_>,
    ) -> RateLimitResult<Reservation> {
        match self.redis_incr(key, weight, now, policy).await {
            Ok(r) => Ok(r),
            Err(RateLimitError::LimitReached(r)) => Err(RateLimitError::LimitReached(r)),
            Err(transport_err) => {
                warn!(key = %key, error = %transport_err, "redis rate store unavailable");
                if let Some(fallback) = &self.fallback {
                    return fallback.incr(key, weight, now, policy).await;
                }
                // Fail-closed: no fallback configured, so deny the request.
                Err(RateLimitError::LimitReached(Reservation {
                    req: weight as f64,
                    bucket: 0,
                    time_to_act: now,
                    last: now,
                }))
            }
        }
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        let mut conn = self.pool.get().await?;
        if value == 0 {
            let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            return Ok(());
        }
        let now = SystemTime::now();
        let data = RateData::new(value as f64, now);
        let json = serde_json::to_string(&data)
            .map_err(|e| RateLimitError::store(format!("failed to serialise rate data: {e}")))?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
