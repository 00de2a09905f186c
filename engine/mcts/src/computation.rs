//! A network computation that answers from the cache when it can.
//!
//! `CachingComputation` is a one-shot batch builder: positions are queued
//! during minibatch gathering (and speculative prefetch), deduplicated
//! against the evaluation cache and against keys already queued in the
//! same batch, then evaluated in a single blocking backend call. After
//! that call every result — fresh or cached — is served uniformly through
//! pinned cache entries.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use xqzero_core::{Move, NetworkComputation, NetworkError, Position, PositionHistory};

use crate::cache::{CachedEvaluation, NNCache};

enum Slot {
    /// Answered from the cache at queue time, or converted from a pending
    /// backend result after the batch ran.
    Cached(Arc<CachedEvaluation>),
    /// Waiting for the backend batch.
    Pending {
        backend_idx: usize,
        key: u64,
        moves: Vec<Move>,
    },
}

pub struct CachingComputation<P, C> {
    computation: C,
    cache: Arc<NNCache>,
    slots: Vec<Slot>,
    /// Keys already queued to the backend in this batch.
    queued: HashSet<u64>,
    backend_inputs: usize,
    cache_hits: usize,
    _position: PhantomData<fn() -> P>,
}

impl<P, C> CachingComputation<P, C>
where
    P: Position,
    C: NetworkComputation<P>,
{
    pub fn new(computation: C, cache: Arc<NNCache>) -> CachingComputation<P, C> {
        CachingComputation {
            computation,
            cache,
            slots: Vec::new(),
            queued: HashSet::new(),
            backend_inputs: 0,
            cache_hits: 0,
            _position: PhantomData,
        }
    }

    /// Queue the position `history` currently ends in, keyed by `key`.
    /// `moves` are that position's legal moves; the cache stores the
    /// policy over exactly this set. Returns the slot index results will
    /// be read back from.
    pub fn add_input(&mut self, key: u64, history: &PositionHistory<P>, moves: Vec<Move>) -> usize {
        if let Some(entry) = self.cache.lookup(key) {
            self.cache_hits += 1;
            self.slots.push(Slot::Cached(entry));
        } else {
            self.queue_backend(key, history, moves);
        }
        self.slots.len() - 1
    }

    /// Speculative variant for prefetch: queue only if `key` is neither
    /// cached nor already part of this batch. Returns whether a backend
    /// input was added.
    pub fn add_input_if_needed(
        &mut self,
        key: u64,
        history: &PositionHistory<P>,
        moves: Vec<Move>,
    ) -> bool {
        if self.queued.contains(&key) || self.cache.contains(key) {
            return false;
        }
        self.queue_backend(key, history, moves);
        true
    }

    fn queue_backend(&mut self, key: u64, history: &PositionHistory<P>, moves: Vec<Move>) {
        let backend_idx = self.backend_inputs;
        self.computation.add_input(history);
        self.backend_inputs += 1;
        self.queued.insert(key);
        self.slots.push(Slot::Pending {
            backend_idx,
            key,
            moves,
        });
    }

    /// Number of slots queued, hits and misses together.
    pub fn entry_count(&self) -> usize {
        self.slots.len()
    }

    /// Inputs that will actually reach the backend.
    pub fn backend_batch_size(&self) -> usize {
        self.backend_inputs
    }

    pub fn cache_hit_count(&self) -> usize {
        self.cache_hits
    }

    /// Run the backend on all pending inputs, then publish every fresh
    /// result into the cache. Afterwards all slots serve from cache
    /// entries.
    pub fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        if self.backend_inputs > 0 {
            self.computation.compute_blocking()?;
            let got = self.computation.batch_size();
            if got != self.backend_inputs {
                return Err(NetworkError::OutputMismatch {
                    expected: self.backend_inputs,
                    got,
                });
            }
        }
        for slot in &mut self.slots {
            if let Slot::Pending {
                backend_idx,
                key,
                moves,
            } = slot
            {
                let p = moves
                    .iter()
                    .map(|&mv| (mv, self.computation.p(*backend_idx, mv)))
                    .collect();
                let eval = CachedEvaluation {
                    q: self.computation.q(*backend_idx),
                    p,
                };
                let entry = self.cache.insert(*key, eval);
                *slot = Slot::Cached(entry);
            }
        }
        Ok(())
    }

    /// Value head result for `slot`. Valid after `compute_blocking`.
    pub fn get_q(&self, slot: usize) -> f32 {
        match &self.slots[slot] {
            Slot::Cached(entry) => entry.q,
            Slot::Pending { .. } => {
                debug_assert!(false, "get_q before compute_blocking");
                0.0
            }
        }
    }

    /// Raw policy score of `mv` for `slot`. Valid after
    /// `compute_blocking`.
    pub fn get_p(&self, slot: usize, mv: Move) -> f32 {
        match &self.slots[slot] {
            Slot::Cached(entry) => entry.p_for(mv),
            Slot::Pending { .. } => {
                debug_assert!(false, "get_p before compute_blocking");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use games_tictactoe::TicTacToe;
    use xqzero_core::{Network, UniformNetwork};

    fn history() -> PositionHistory<TicTacToe> {
        PositionHistory::new(TicTacToe::new())
    }

    fn key_of(history: &PositionHistory<TicTacToe>) -> u64 {
        history.hash_last(1)
    }

    #[test]
    fn test_miss_goes_to_backend_and_fills_cache() {
        let cache = Arc::new(NNCache::new(16));
        let network = UniformNetwork::new();
        let history = history();
        let moves = history.last().legal_moves();
        let key = key_of(&history);

        let mut computation =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        let slot = computation.add_input(key, &history, moves.clone());
        assert_eq!(computation.backend_batch_size(), 1);
        assert_eq!(computation.cache_hit_count(), 0);

        computation.compute_blocking().unwrap();
        assert!(computation.get_q(slot).abs() < 1e-6);
        assert!((computation.get_p(slot, moves[0]) - 1.0).abs() < 1e-6);
        assert!(cache.contains(key));
    }

    #[test]
    fn test_hit_skips_backend() {
        let cache = Arc::new(NNCache::new(16));
        let network = UniformNetwork::new();
        let history = history();
        let moves = history.last().legal_moves();
        let key = key_of(&history);

        let mut warmup =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        warmup.add_input(key, &history, moves.clone());
        warmup.compute_blocking().unwrap();

        let mut computation =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        let slot = computation.add_input(key, &history, moves.clone());
        assert_eq!(computation.backend_batch_size(), 0);
        assert_eq!(computation.cache_hit_count(), 1);

        // No backend inputs: compute is a no-op and results serve from
        // the cache.
        computation.compute_blocking().unwrap();
        assert!(computation.get_q(slot).abs() < 1e-6);
        assert!((computation.get_p(slot, moves[1]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_prefetch_dedupes_within_batch() {
        let cache = Arc::new(NNCache::new(16));
        let network = UniformNetwork::new();
        let history = history();
        let moves = history.last().legal_moves();
        let key = key_of(&history);

        let mut computation =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        assert!(computation.add_input_if_needed(key, &history, moves.clone()));
        assert!(!computation.add_input_if_needed(key, &history, moves.clone()));
        assert_eq!(computation.backend_batch_size(), 1);

        computation.compute_blocking().unwrap();
        assert!(cache.contains(key));
        // Now cached, so a fresh batch skips it too.
        let mut next =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        assert!(!next.add_input_if_needed(key, &history, moves));
    }

    #[test]
    fn test_zero_capacity_cache_still_serves_batch_results() {
        let cache = Arc::new(NNCache::new(0));
        let network = UniformNetwork::new();
        let history = history();
        let moves = history.last().legal_moves();
        let key = key_of(&history);

        let mut computation =
            CachingComputation::new(<UniformNetwork as Network<TicTacToe>>::new_computation(&network), Arc::clone(&cache));
        let slot = computation.add_input(key, &history, moves.clone());
        computation.compute_blocking().unwrap();
        assert!((computation.get_p(slot, moves[0]) - 1.0).abs() < 1e-6);
        assert!(!cache.contains(key));
    }
}
