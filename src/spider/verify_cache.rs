//! Bounded TTL cache of DNS verification outcomes.
//!
//! Keyed by `(source IP, claimed crawler)`. Definitive outcomes live for the
//! verification TTL, transient failures (timeouts, resolver errors) for the
//! shorter failure TTL so a crawler is re-checked soon after DNS recovers.
//! Expired entries are dropped on lookup; the LRU bound caps memory.

use std::{
    net::IpAddr,
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use lru::LruCache;

use crate::cache::mutex_lock;

const SOURCE: &str = "spider::verify_cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Verified,
    Rejected,
    /// DNS did not answer in time or failed; treated as unverified.
    Transient,
}

impl Outcome {
    pub fn is_verified(self) -> bool {
        matches!(self, Outcome::Verified)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    outcome: Outcome,
    expires_at: Instant,
}

type Key = (IpAddr, &'static str);

pub struct VerificationCache {
    entries: Mutex<LruCache<Key, Entry>>,
    verify_ttl: Duration,
    failure_ttl: Duration,
}

impl VerificationCache {
    pub fn new(capacity: usize, verify_ttl: Duration, failure_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            verify_ttl,
            failure_ttl,
        }
    }

    /// Cached outcome for `(ip, claimed)` if it has not expired at `now`.
    pub fn get(&self, ip: IpAddr, claimed: &'static str, now: Instant) -> Option<Outcome> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        let key = (ip, claimed);
        let cached = entries.get(&key).copied();
        match cached {
            Some(entry) if entry.expires_at > now => Some(entry.outcome),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, ip: IpAddr, claimed: &'static str, outcome: Outcome, now: Instant) {
        let ttl = match outcome {
            Outcome::Transient => self.failure_ttl,
            Outcome::Verified | Outcome::Rejected => self.verify_ttl,
        };
        let entry = Entry {
            outcome,
            expires_at: now + ttl,
        };
        mutex_lock(&self.entries, SOURCE, "insert").put((ip, claimed), entry);
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
