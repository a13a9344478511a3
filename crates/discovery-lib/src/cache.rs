//! Generational cache for cloud inventory entities
//!
//! Most of the objects the pipeline fetches (task definitions, container
//! instances, EC2 instances) are effectively immutable, but there is no
//! change-notification stream to invalidate against. Instead of TTL or
//! LRU bookkeeping the cache keeps exactly two generations: everything
//! read or fetched during a round is carried into the next round, and
//! anything untouched for a full round is dropped at the following flip.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// Hit/miss counters and current-generation size, for round logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

/// Two-generation cache, flipped once per discovery round
#[derive(Debug, Default)]
pub struct FlipCache<K, V> {
    current: HashMap<K, V>,
    next: HashMap<K, V>,
    hits: u64,
    misses: u64,
}

impl<K, V> FlipCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            current: HashMap::new(),
            next: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Promote the next generation, evicting everything that was not
    /// touched since the previous flip. Counters restart per round.
    pub fn flip(&mut self) {
        self.current = std::mem::take(&mut self.next);
        self.hits = 0;
        self.misses = 0;
    }

    /// Look up one key, invoking `fetch` on a miss.
    ///
    /// A fetched `Some` is written into both generations; `None` (an
    /// entity in a transient state) is never cached and will be fetched
    /// again next round.
    pub async fn get<F, Fut>(&mut self, key: &K, fetch: F) -> Result<Option<V>>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        if let Some(value) = self.current.get(key) {
            self.hits += 1;
            let value = value.clone();
            self.next.insert(key.clone(), value.clone());
            return Ok(Some(value));
        }
        self.misses += 1;
        let fetched = fetch(key.clone()).await?;
        if let Some(value) = &fetched {
            self.current.insert(key.clone(), value.clone());
            self.next.insert(key.clone(), value.clone());
        }
        Ok(fetched)
    }

    /// Look up a batch of keys, invoking `fetch` once for only the
    /// missing ones. Keys absent from the fetch result are absent from
    /// the returned map and stay uncached.
    pub async fn get_many<F, Fut>(&mut self, keys: &[K], fetch: F) -> Result<HashMap<K, V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>>>,
    {
        let mut result = HashMap::new();
        let mut missing = Vec::new();
        for key in keys {
            if result.contains_key(key) || missing.contains(key) {
                continue;
            }
            match self.current.get(key) {
                Some(value) => {
                    self.hits += 1;
                    self.next.insert(key.clone(), value.clone());
                    result.insert(key.clone(), value.clone());
                }
                None => {
                    self.misses += 1;
                    missing.push(key.clone());
                }
            }
        }
        if !missing.is_empty() {
            let fetched = fetch(missing).await?;
            for (key, value) in fetched {
                self.current.insert(key.clone(), value.clone());
                self.next.insert(key.clone(), value.clone());
                result.insert(key, value);
            }
        }
        Ok(result)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.current.len(),
        }
    }
}
