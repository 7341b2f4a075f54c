//! In-memory rolling (sliding) fixed-window counter store (§4.4, §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::algorithm::truncate;
use crate::error::RateLimitResult;
use crate::store::CounterStore;

struct RollingState {
    slices: HashMap<SystemTime, i64>,
}

type Entry = Arc<Mutex<RollingState>>;

/// Approximates a sliding window by bucketing counts into `window_time / n`
/// sub-slices keyed by slice start, pruning slices strictly older than
/// `now - window_time` on every access.
///
/// Implements the same [`CounterStore`] contract as
/// [`super::memory_counter::MemoryFixedWindowStore`], so it plugs into the
/// same [`crate::limiter::FixedWindowLimiter`] — rolling-window is a store
/// variant, not a separate limiter algorithm.
pub struct MemoryRollingWindowStore {
    window_time: Duration,
    slice_duration: Duration,
    map: Arc<DashMap<String, Entry>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl MemoryRollingWindowStore {
    pub fn new(window_time: Duration, n: u32) -> Self {
        assert!(n > 0, "number of slices must be positive");
        let slice_duration = window_time / n;
        let map: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweeper = tokio::spawn(sweep(map.clone(), window_time));
        Self {
            window_time,
            slice_duration,
            map,
            sweeper,
        }
    }

    fn load_or_insert(&self, key: &str) -> Entry {
        self.map
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RollingState {
                    slices: HashMap::new(),
                }))
            })
            .clone()
    }
}

async fn sweep(map: Arc<DashMap<String, Entry>>, window_time: Duration) {
    let mut interval = tokio::time::interval(window_time);
    loop {
        interval.tick().await;
        let now = SystemTime::now();
        let cutoff = now
            .checked_sub(window_time)
            .unwrap_or(std::time::UNIX_EPOCH);
        let snapshot: Vec<(String, Entry)> =
            map.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (key, entry) in snapshot {
            let all_expired = {
                let state = entry.lock().await;
                state.slices.keys().all(|start| *start < cutoff)
            };
            if all_expired {
                trace!(key = %key, "sweeping idle rolling-window entry");
                map.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
            }
        }
    }
}

#[async_trait]
impl CounterStore for MemoryRollingWindowStore {
    // `weight` is intentionally unused: each increment counts as one event
    // regardless of the requested weight, matching the source behaviour.
    async fn incr(&self, key: &str, _weight: i64, now: SystemTime) -> RateLimitResult<i64> {
        let entry = self.load_or_insert(key);
        let slice_idx = truncate(now, self.slice_duration);
        let cutoff = now
            .checked_sub(self.window_time)
            .unwrap_or(std::time::UNIX_EPOCH);

        let count = {
            let mut state = entry.lock().await;
            let mut count: i64 = 1;
            state.slices.retain(|start, v| {
                if *start < cutoff {
                    false
                } else {
                    count += *v;
                    true
                }
            });
            *state.slices.entry(slice_idx).or_insert(0) += 1;
            count
        };

        self.map.entry(key.to_string()).or_insert_with(|| entry.clone());
        trace!(key = %key, count = count, "rolling-window incr");
        Ok(count)
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        let now = SystemTime::now();
        debug!(key = %key, value = value, "rolling-window reset");
        let slice_idx = truncate(now, self.slice_duration);
        let mut slices = HashMap::new();
        slices.insert(slice_idx, value);
        self.map.insert(
            key.to_string(),
            Arc::new(Mutex::new(RollingState { slices })),
        );
        Ok(())
    }
}

impl Drop for MemoryRollingWindowStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
