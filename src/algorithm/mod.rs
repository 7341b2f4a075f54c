//! Pure policy math shared by limiters and stores.
//!
//! Every function here is a pure function of its inputs — no locking, no
//! I/O — so it can run identically inside an in-memory store's mutex guard
//! or inside a Redis watched transaction.

pub mod leaky_bucket;

use std::time::{Duration, SystemTime};

/// The next instant at which a fixed window starting on `window_time`
/// boundaries rolls over, measured from `now`.
///
/// Equal to `now` itself when `now` already sits exactly on a boundary —
/// preserved literally from the source behaviour rather than treated as
/// an off-by-one to "fix".
pub fn next_window_boundary(now: SystemTime, window_time: Duration) -> SystemTime {
    let truncated = truncate(now, window_time);
    if truncated == now {
        truncated
    } else {
        truncated + window_time
    }
}

/// Truncate `t` down to the nearest multiple of `step` since the Unix epoch.
pub fn truncate(t: SystemTime, step: Duration) -> SystemTime {
    let since_epoch = t
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock predates the Unix epoch");
    let step_nanos = step.as_nanos();
    if step_nanos == 0 {
        return t;
    }
    let elapsed_nanos = since_epoch.as_nanos();
    let truncated_nanos = (elapsed_nanos / step_nanos) * step_nanos;
    std::time::UNIX_EPOCH + Duration::from_nanos(truncated_nanos as u64)
}
