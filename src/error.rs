//! Error types for the rate limiting engine.

use thiserror::Error;

use crate::reservation::Reservation;

/// Result type used throughout the engine.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Errors produced by stores, policy callbacks, and limiters.
///
/// [`RateLimitError::LimitReached`] is a logical-rejection sentinel, not a
/// transport failure: policy callbacks and stores use it internally to
/// thread a denying [`Reservation`] through `?`, but it must never escape
/// [`crate::limiter::Limiter::allow`] as an `Err` — the limiter normalises
/// it into `(reservation, allowed = false, error = None)`.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Logical rejection: the policy denied admission. Carries the
    /// saturated reservation the caller should see.
    #[error("rate limit reached")]
    LimitReached(Reservation),

    /// Store I/O or state-corruption error (Redis transport, unparseable
    /// persisted JSON, malformed in-memory entry).
    #[error("rate limit store error: {0}")]
    Store(String),

    /// Invalid configuration, surfaced synchronously at construction time.
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// Redis client error, wrapped directly.
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Failure to check out a connection from the Redis pool.
    #[cfg(feature = "redis-store")]
    #[error("redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),
}

impl RateLimitError {
    /// Build a store error from any displayable message.
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Build a configuration error from any displayable message.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// The reservation carried by a logical rejection, if this is one.
    pub fn reservation(&self) -> Option<Reservation> {
        match self {
            Self::LimitReached(r) => Some(*r),
            _ => None,
        }
    }
}
