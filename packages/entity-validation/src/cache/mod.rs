//! Decision cache - content-addressed store of prior decisions.
//!
//! Keys combine the schema fingerprint, the rubric fingerprint and the block
//! fingerprint, so a decision is reused only when the content and the
//! question asked about it are both unchanged. Entries live in a fixed set of
//! `LruCache` shards, each behind its own mutex. A key always maps to the
//! same shard, so lookups and inserts lock one shard and eviction pops the
//! shard's least recently used entry in constant time.

pub mod fingerprint;

pub use fingerprint::{cluster_near_duplicates, BlockFingerprint, NearDuplicateGroup};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::types::{CacheConfig, Decision};

const MAX_SHARDS: usize = 16;

/// Smallest shard worth splitting off. Small caches stay a single exact LRU.
const MIN_SHARD_ENTRIES: usize = 64;

/// Key of one cached decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub schema_fp: String,
    pub rubric_fp: String,
    pub block_fp: String,
}

impl CacheKey {
    pub fn new(
        schema_fp: impl Into<String>,
        rubric_fp: impl Into<String>,
        block_fp: impl Into<String>,
    ) -> Self {
        Self {
            schema_fp: schema_fp.into(),
            rubric_fp: rubric_fp.into(),
            block_fp: block_fp.into(),
        }
    }
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded, concurrent decision cache shared across jobs.
#[derive(Debug)]
pub struct DecisionCache {
    shards: Vec<Mutex<LruCache<CacheKey, Decision>>>,
    hasher: RandomState,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl DecisionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let max_entries = config.max_entries.max(1);
        let shard_count = (max_entries / MIN_SHARD_ENTRIES).clamp(1, MAX_SHARDS);

        // Spread the remainder so shard capacities sum to exactly max_entries
        let base = max_entries / shard_count;
        let extra = max_entries % shard_count;
        let shards = (0..shard_count)
            .map(|i| {
                let capacity = base + usize::from(i < extra);
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
                ))
            })
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> MutexGuard<'_, LruCache<CacheKey, Decision>> {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a decision. Hits come back with `from_cache = true`.
    ///
    /// An entry that fails basic sanity checks is discarded and reported as
    /// a miss, so the caller recomputes it.
    pub fn get(&self, schema_fp: &str, rubric_fp: &str, block_fp: &str) -> Option<Decision> {
        let key = CacheKey::new(schema_fp, rubric_fp, block_fp);
        self.get_key(&key)
    }

    pub fn get_key(&self, key: &CacheKey) -> Option<Decision> {
        let found = {
            let mut shard = self.shard(key);
            match shard.get(key).cloned() {
                Some(decision) if !is_sane(&decision) => {
                    debug!(block_fp = %key.block_fp, "Discarding corrupt cache entry");
                    shard.pop(key);
                    None
                }
                other => other,
            }
        };

        match found {
            Some(mut decision) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                decision.from_cache = true;
                Some(decision)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a decision, evicting the least recently used entry of its shard
    /// when the shard is full.
    pub fn put(&self, key: CacheKey, decision: Decision) {
        let mut decision = decision;
        decision.from_cache = false;

        let evicted = {
            let mut shard = self.shard(&key);
            if shard.contains(&key) {
                shard.put(key, decision);
                None
            } else {
                shard.push(key, decision)
            }
        };

        if let Some((old, _)) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(block_fp = %old.block_fp, "Evicted least recently used decision");
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn is_sane(decision: &Decision) -> bool {
    let unit = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
    unit(decision.raw_confidence) && unit(decision.calibrated_confidence) && !decision.degraded
}
