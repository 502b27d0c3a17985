//! Per-key token buckets.
//!
//! Ageing is integer-valued: a bucket's timestamp only advances when the
//! elapsed time is worth at least one whole token, so dribbles of sub-token
//! time keep accumulating against the stored timestamp instead of being
//! rounded away on every call.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::record::Record;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: i64,
    tstamp: i64,
}

/// Keyed token bucket; `fill_time` is the time it takes an empty bucket to
/// refill completely.
#[derive(Debug)]
pub struct TokenBucket<K> {
    capacity: i64,
    fill_rate_per_ms: f64,
    buckets: HashMap<K, Bucket>,
}

impl<K> TokenBucket<K>
where
    K: Hash + Eq + Clone,
{
    #[must_use]
    pub fn new(fill_time: Duration, capacity: usize) -> Self {
        let fill_time_ms = (fill_time.as_millis() as i64).max(1);
        let capacity = capacity.max(1) as i64;
        Self {
            capacity,
            fill_rate_per_ms: capacity as f64 / fill_time_ms as f64,
            buckets: HashMap::new(),
        }
    }

    /// Take one token for `key` at time `ts`. Returns true when a token was
    /// available. New keys start with a full bucket.
    pub fn consume(&mut self, key: &K, ts: i64) -> bool {
        let capacity = self.capacity;
        let rate = self.fill_rate_per_ms;
        let bucket = self.buckets.entry(key.clone()).or_insert(Bucket {
            tokens: capacity,
            tstamp: ts,
        });

        let delta = ts - bucket.tstamp;
        if delta > 0 {
            let gained = (delta as f64 * rate) as i64;
            if gained > 0 {
                bucket.tokens = (bucket.tokens + gained).min(capacity);
                bucket.tstamp = ts;
            }
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    /// Tokens remaining for `key`; untouched keys report a full bucket with
    /// no timestamp.
    #[must_use]
    pub fn get(&self, key: &K) -> Record<K, i64> {
        match self.buckets.get(key) {
            Some(b) => Record::new(key.clone(), Some(b.tokens), b.tstamp),
            None => Record::new(key.clone(), Some(self.capacity), -1),
        }
    }

    /// Forget a key's bucket.
    pub fn remove(&mut self, key: &K) {
        self.buckets.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
