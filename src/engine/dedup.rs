//! Bounded LRU/TTL seen-set for event deduplication.
//!
//! Strictly per-consumer-process and a latency optimization only:
//! correctness against duplicate delivery comes from idempotent store
//! transitions, not from this set.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub struct SeenSet {
    cap: usize,
    ttl: Duration,
    entries: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl SeenSet {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            cap,
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a key. Returns true if it was not already present (fresh),
    /// false for a duplicate within the TTL.
    pub fn insert(&mut self, key: &str) -> bool {
        self.insert_at(key, Instant::now())
    }

    fn insert_at(&mut self, key: &str, now: Instant) -> bool {
        self.purge_expired(now);

        if let Some(&t) = self.entries.get(key) {
            if now.duration_since(t) < self.ttl {
                return false;
            }
        }

        self.entries.insert(key.to_string(), now);
        self.order.push_back((key.to_string(), now));

        while self.entries.len() > self.cap {
            match self.order.pop_front() {
                // The deque can hold stale duplicates of re-inserted keys;
                // only drop the map entry if the timestamp still matches.
                Some((k, t)) => {
                    if self.entries.get(&k) == Some(&t) {
                        self.entries.remove(&k);
                    }
                }
                None => break,
            }
        }
        true
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some((_, t)) = self.order.front() {
            if now.duration_since(*t) < self.ttl {
                break;
            }
            if let Some((k, t)) = self.order.pop_front() {
                if self.entries.get(&k) == Some(&t) {
                    self.entries.remove(&k);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
