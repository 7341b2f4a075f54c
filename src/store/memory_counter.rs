//! In-memory fixed-window counter store (§4.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::algorithm::truncate;
use crate::error::RateLimitResult;
use crate::store::CounterStore;

struct WindowState {
    val: i64,
    expire: SystemTime,
}

type Entry = Arc<Mutex<WindowState>>;

/// Concurrent keyed fixed-window counters with a background expiry sweeper.
///
/// Mirrors the load-or-store / lock / mutate / unlock / re-register access
/// path in §4.5: step 6 (re-registration) exists solely to repair the race
/// where the sweeper evicts a key between the initial load and the mutator
/// releasing its lock. Do not remove it.
pub struct MemoryFixedWindowStore {
    window_time: Duration,
    map: Arc<DashMap<String, Entry>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl MemoryFixedWindowStore {
    /// `ttl` (the sweep interval) and the window duration are the same
    /// quantity here, matching the source's choice to size the sweep cycle
    /// off the algorithm's own window.
    pub fn new(window_time: Duration) -> Self {
        let map: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweeper = tokio::spawn(sweep(map.clone(), window_time));
        Self {
            window_time,
            map,
            sweeper,
        }
    }

    fn load_or_insert(&self, key: &str) -> Entry {
        self.map
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(WindowState {
                    val: 0,
                    expire: SystemTime::UNIX_EPOCH,
                }))
            })
            .clone()
    }
}

async fn sweep(map: Arc<DashMap<String, Entry>>, ttl: Duration) {
    let mut interval = tokio::time::interval(ttl);
    loop {
        interval.tick().await;
        let now = SystemTime::now();
        let snapshot: Vec<(String, Entry)> =
            map.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (key, entry) in snapshot {
            let expired = now > entry.lock().await.expire;
            if expired {
                trace!(key = %key, "sweeping idle fixed-window entry");
                map.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
            }
        }
    }
}

#[async_trait]
impl CounterStore for MemoryFixedWindowStore {
    async fn incr(&self, key: &str, weight: i64, now: SystemTime) -> RateLimitResult<i64> {
        let entry = self.load_or_insert(key);
        let new_val = {
            let mut state = entry.lock().await;
            if now > state.expire {
                state.val = 0;
            }
            state.val += weight;
            state.expire = truncate(now, self.window_time) + self.window_time;
            state.val
        };
        // Re-register to repair a sweep that raced the load above.
        self.map.entry(key.to_string()).or_insert_with(|| entry.clone());
        trace!(key = %key, new_val = new_val, "fixed-window incr");
        Ok(new_val)
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        let now = SystemTime::now();
        debug!(key = %key, value = value, "fixed-window reset");
        self.map.insert(
            key.to_string(),
            Arc::new(Mutex::new(WindowState {
                val: value,
                expire: truncate(now, self.window_time) + self.window_time,
            })),
        );
        Ok(())
    }
}

impl Drop for MemoryFixedWindowStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_accumulate_within_a_window() {
        let store = MemoryFixedWindowStore::new(Duration::from_secs(60));
        let now = SystemTime::now();
        assert_eq!(store.incr("k", 1, now).await.unwrap(), 1);
        assert_eq!(store.incr("k", 1, now).await.unwrap(), 2);
        assert_eq!(store.incr("k", 3, now).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn window_rollover_resets_the_counter() {
        let store = MemoryFixedWindowStore::new(Duration::from_secs(1));
        let t0 = truncate(SystemTime::now(), Duration::from_secs(1));
        assert_eq!(store.incr("k", 5, t0).await.unwrap(), 5);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(store.incr("k", 1, t1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_overwrites_the_counter() {
        let store = MemoryFixedWindowStore::new(Duration::from_secs(60));
        store.incr("k", 9, SystemTime::now()).await.unwrap();
        store.reset("k", 2).await.unwrap();
        assert_eq!(store.incr("k", 0, SystemTime::now()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn independent_keys_do_not_interfere() {
        let store = MemoryFixedWindowStore::new(Duration::from_secs(60));
        let now = SystemTime::now();
        store.incr("a", 1, now).await.unwrap();
        assert_eq!(store.incr("b", 1, now).await.unwrap(), 1);
    }
}
