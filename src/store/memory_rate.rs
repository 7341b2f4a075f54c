//! In-memory leaky-bucket rate store (§4.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::RateLimitResult;
use crate::reservation::Reservation;
use crate::store::{PolicyFn, RateData, RateStore};

type Entry = Arc<Mutex<RateData>>;

/// Concurrent keyed leaky-bucket state with a background expiry sweeper.
///
/// Same access pattern as [`super::memory_counter::MemoryFixedWindowStore`]:
/// load-or-store, lock, run the policy, persist only on admission, unlock,
/// re-register.
pub struct MemoryRateStore {
    ttl: Duration,
    map: Arc<DashMap<String, Entry>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl MemoryRateStore {
    pub fn new(ttl: Duration) -> Self {
        let map: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweeper = tokio::spawn(sweep(map.clone(), ttl));
        Self { ttl, map, sweeper }
    }

    fn load_or_insert(&self, key: &str, now: SystemTime) -> Entry {
        self.map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateData::new(0.0, now))))
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
            let idle = {
                let data = entry.lock().await;
                now.duration_since(data.last()).unwrap_or(Duration::ZERO) > ttl
            };
            if idle {
                trace!(key = %key, "sweeping idle leaky-bucket entry");
                map.remove_if(&key, |_, v| Arc::ptr_eq(v, &entry));
            }
        }
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn incr(
        &self,
        key: &str,
        weight: i64,
        now: SystemTime,
        policy: &PolicyFn<'_>,
    ) -> RateLimitResult<Reservation> {
        let entry = self.load_or_insert(key, now);
        let result = {
            let mut data = entry.lock().await;
            let outcome = policy(data.remain, data.last(), now, weight);
            // Only an admitted outcome advances the persisted state; a
            // rejection leaves `remain`/`last` exactly as they were.
            if let Ok(r) = &outcome {
                *data = RateData::new(r.req, r.last);
            }
            outcome
        };
        self.map.entry(key.to_string()).or_insert_with(|| entry.clone());
        trace!(key = %key, admitted = result.is_ok(), "leaky-bucket incr");
        result
    }

    async fn reset(&self, key: &str, value: i64) -> RateLimitResult<()> {
        let now = SystemTime::now();
        debug!(key = %key, value = value, "leaky-bucket reset");
        self.map
            .insert(key.to_string(), Arc::new(Mutex::new(RateData::new(value as f64, now))));
        Ok(())
    }
}

impl Drop for MemoryRateStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::leaky_bucket;

    fn t(secs: u64) -> SystemTime {
        std::time::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn policy(rate: f64, period: Duration, bucket: i64) -> impl Fn(f64, SystemTime, SystemTime, i64) -> RateLimitResult<Reservation> {
        move |remain, last, now, weight| leaky_bucket::step(rate, period, bucket, remain, last, now, weight)
    }

    #[tokio::test]
    async fn admits_then_rejects_once_saturated() {
        let store = MemoryRateStore::new(Duration::from_secs(60));
        let p = policy(1.0, Duration::from_secs(1), 2);

        assert!(store.incr("k", 1, t(0), &p).await.is_ok());
        assert!(store.incr("k", 1, t(0), &p).await.is_ok());
        let err = store.incr("k", 1, t(0), &p).await.unwrap_err();
        assert_eq!(err.reservation().unwrap().req, 2.0);
    }

    #[tokio::test]
    async fn rejection_does_not_advance_last() {
        let store = MemoryRateStore::new(Duration::from_secs(60));
        let p = policy(1.0, Duration::from_secs(1), 1);

        store.incr("k", 1, t(0), &p).await.unwrap();
        // large enough weight to overflow even after 5s of leak
        let err = store.incr("k", 2, t(5), &p).await.unwrap_err();
        assert_eq!(err.reservation().unwrap().last, t(0));
    }

    #[tokio::test]
    async fn reset_seeds_remain() {
        let store = MemoryRateStore::new(Duration::from_secs(60));
        store.reset("k", 7).await.unwrap();
        let p = policy(1.0, Duration::from_secs(1), 100);
        let r = store.incr("k", 0, t(0), &p).await.unwrap();
        assert_eq!(r.req, 7.0);
    }
}
