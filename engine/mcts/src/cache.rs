//! Bounded concurrent cache of network evaluations.
//!
//! Keys are 64-bit position fingerprints (optionally folding several prior
//! plies, see `SearchOptions::cache_history_length`); values are the value
//! head plus the raw per-move policy of one evaluated position. Lookups
//! take the shared lock; insertion, eviction and touch-on-hit take the
//! exclusive lock.
//!
//! Eviction is LRU-style with a lazily-compacted recency queue: touching
//! appends a fresh `(key, stamp)` pair, eviction pops from the front and
//! skips pairs whose stamp is no longer current. Entries are handed out as
//! `Arc`s, so an evaluation still in use survives eviction and is freed
//! when its last user drops it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use xqzero_core::Move;

/// One cached network result: value head and raw policy scores for every
/// legal move of the evaluated position.
#[derive(Debug, Clone)]
pub struct CachedEvaluation {
    pub q: f32,
    pub p: Vec<(Move, f32)>,
}

impl CachedEvaluation {
    /// Raw policy score for `mv`, or 0 if the move is unknown to this
    /// entry (it was illegal in the evaluated position).
    pub fn p_for(&self, mv: Move) -> f32 {
        self.p
            .iter()
            .find(|(m, _)| *m == mv)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct CacheSlot {
    eval: Arc<CachedEvaluation>,
    stamp: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<u64, CacheSlot>,
    /// (key, stamp) pairs in recency order; stale pairs are skipped.
    recency: VecDeque<(u64, u64)>,
    clock: u64,
}

impl CacheInner {
    fn touch(&mut self, key: u64) {
        if let Some(slot) = self.map.get_mut(&key) {
            self.clock += 1;
            slot.stamp = self.clock;
            self.recency.push_back((key, slot.stamp));
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.map.len() > capacity {
            let (key, stamp) = match self.recency.pop_front() {
                Some(front) => front,
                None => return,
            };
            let current = self.map.get(&key).map(|slot| slot.stamp);
            if current == Some(stamp) {
                self.map.remove(&key);
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.recency.len() > (self.map.len() * 4).max(64) {
            let map = &self.map;
            self.recency
                .retain(|(key, stamp)| map.get(key).map(|slot| slot.stamp) == Some(*stamp));
        }
    }
}

/// Concurrent, bounded, content-addressed evaluation cache.
#[derive(Debug)]
pub struct NNCache {
    capacity: usize,
    inner: RwLock<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NNCache {
    /// A cache holding at most `capacity` evaluations. Capacity 0 is a
    /// valid always-miss cache.
    pub fn new(capacity: usize) -> NNCache {
        NNCache {
            capacity,
            inner: RwLock::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pinned handle to the cached evaluation for `key`, refreshing its
    /// recency on hit.
    pub fn lookup(&self, key: u64) -> Option<Arc<CachedEvaluation>> {
        let found = {
            let inner = self.read();
            inner.map.get(&key).map(|slot| Arc::clone(&slot.eval))
        };
        match found {
            Some(eval) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.write().touch(key);
                Some(eval)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether `key` is currently cached. Does not refresh recency or
    /// count as a hit.
    pub fn contains(&self, key: u64) -> bool {
        self.read().map.contains_key(&key)
    }

    /// Insert `eval` under `key`, returning the shared handle that now
    /// (or, at capacity 0, never) backs the cache slot.
    pub fn insert(&self, key: u64, eval: CachedEvaluation) -> Arc<CachedEvaluation> {
        let eval = Arc::new(eval);
        if self.capacity == 0 {
            return eval;
        }
        let mut inner = self.write();
        inner.clock += 1;
        let stamp = inner.clock;
        inner.recency.push_back((key, stamp));
        inner.map.insert(
            key,
            CacheSlot {
                eval: Arc::clone(&eval),
                stamp,
            },
        );
        inner.evict_to(self.capacity);
        inner.maybe_compact();
        eval
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.map.clear();
        inner.recency.clear();
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xqzero_core::Square;

    fn mv(cell: u8) -> Move {
        Move::new(Square::new(cell), Square::new(cell))
    }

    fn eval(q: f32) -> CachedEvaluation {
        CachedEvaluation {
            q,
            p: vec![(mv(0), 0.7), (mv(1), 0.3)],
        }
    }

    #[test]
    fn test_insert_lookup() {
        let cache = NNCache::new(8);
        assert!(cache.lookup(1).is_none());
        cache.insert(1, eval(0.5));
        let entry = cache.lookup(1).unwrap();
        assert!((entry.q - 0.5).abs() < 1e-6);
        assert!((entry.p_for(mv(0)) - 0.7).abs() < 1e-6);
        assert!(entry.p_for(mv(5)).abs() < 1e-6);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let cache = NNCache::new(2);
        cache.insert(1, eval(0.1));
        cache.insert(2, eval(0.2));
        cache.insert(3, eval(0.3));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_touch_on_hit_refreshes() {
        let cache = NNCache::new(2);
        cache.insert(1, eval(0.1));
        cache.insert(2, eval(0.2));
        // Key 1 becomes most recent, so key 2 is the eviction victim.
        cache.lookup(1);
        cache.insert(3, eval(0.3));
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_reinsert_updates_in_place() {
        let cache = NNCache::new(2);
        cache.insert(1, eval(0.1));
        cache.insert(1, eval(0.9));
        assert_eq!(cache.len(), 1);
        assert!((cache.lookup(1).unwrap().q - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_zero_capacity_always_misses() {
        let cache = NNCache::new(0);
        cache.insert(1, eval(0.1));
        assert!(cache.lookup(1).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_evicted_entry_survives_while_pinned() {
        let cache = NNCache::new(1);
        cache.insert(1, eval(0.25));
        let pinned = cache.lookup(1).unwrap();
        cache.insert(2, eval(0.5));
        assert!(!cache.contains(1));
        // The handle keeps the evaluation alive.
        assert!((pinned.q - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_recency_queue_compacts() {
        let cache = NNCache::new(4);
        for key in 0..4 {
            cache.insert(key, eval(key as f32));
        }
        for _ in 0..1000 {
            cache.lookup(0);
        }
        cache.insert(9, eval(0.9));
        let inner = cache.read();
        assert!(inner.recency.len() <= (inner.map.len() * 4).max(64) + 1);
    }
}
