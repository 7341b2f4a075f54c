//! Rate limiting primitives: fixed-window, rolling-window, and leaky-bucket
//! admission control over in-memory and Redis-backed stores.
//!
//! The core abstraction is [`Limiter`]: anything that can decide, per key,
//! whether to admit or reject an event, and report when the caller may try
//! again. Two compositions are provided out of the box —
//! [`FixedWindowLimiter`] (counter-based, plugging into either a plain or
//! rolling-window store) and [`LeakyBucketLimiter`] (continuous-leak,
//! plugging into an in-memory or Redis-backed rate store). [`middleware`]
//! builds a framework-agnostic admission check on top of any `Limiter`.

pub mod algorithm;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod reservation;
pub mod store;

pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{FixedWindowLimiter, LeakyBucketLimiter, Limiter};
pub use middleware::{AdmissionMiddleware, AdmissionOutcome, KeyExtractor, RequestInfo};
pub use reservation::Reservation;
pub use store::{CounterStore, RateData, RateStore};
