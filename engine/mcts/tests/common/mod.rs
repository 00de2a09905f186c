//! Shared fixtures for the search integration tests.
//!
//! Each test binary compiles its own copy, so not every fixture is used
//! everywhere.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use games_tictactoe::TicTacToe;
use mcts::NodeTree;
use xqzero_core::{
    BestMoveCallback, BestMoveInfo, Move, Network, NetworkComputation, NetworkError, Position,
    PositionHistory,
};

/// Uniform-policy, zero-value stub that counts backend activity.
/// `evaluated` counts positions that actually reached the backend (cache
/// misses); `batches` counts non-empty blocking calls.
pub struct CountingNetwork {
    pub evaluated: Arc<AtomicUsize>,
    pub batches: Arc<AtomicUsize>,
}

impl CountingNetwork {
    pub fn new() -> CountingNetwork {
        CountingNetwork {
            evaluated: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn evaluated_count(&self) -> usize {
        self.evaluated.load(Ordering::SeqCst)
    }
}

pub struct CountingComputation {
    inputs: usize,
    evaluated: Arc<AtomicUsize>,
    batches: Arc<AtomicUsize>,
}

impl<P: Position> NetworkComputation<P> for CountingComputation {
    fn add_input(&mut self, _history: &PositionHistory<P>) {
        self.inputs += 1;
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        if self.inputs > 0 {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.evaluated.fetch_add(self.inputs, Ordering::SeqCst);
        }
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.inputs
    }

    fn q(&self, _idx: usize) -> f32 {
        0.0
    }

    fn p(&self, _idx: usize, _mv: Move) -> f32 {
        1.0
    }
}

impl<P: Position> Network<P> for CountingNetwork {
    type Computation = CountingComputation;

    fn new_computation(&self) -> CountingComputation {
        CountingComputation {
            inputs: 0,
            evaluated: Arc::clone(&self.evaluated),
            batches: Arc::clone(&self.batches),
        }
    }
}

/// Backend whose blocking call always fails.
pub struct FailingNetwork;

pub struct FailingComputation {
    inputs: usize,
}

impl<P: Position> NetworkComputation<P> for FailingComputation {
    fn add_input(&mut self, _history: &PositionHistory<P>) {
        self.inputs += 1;
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Err(NetworkError::Backend("injected failure".into()))
    }

    fn batch_size(&self) -> usize {
        self.inputs
    }

    fn q(&self, _idx: usize) -> f32 {
        0.0
    }

    fn p(&self, _idx: usize, _mv: Move) -> f32 {
        0.0
    }
}

impl<P: Position> Network<P> for FailingNetwork {
    type Computation = FailingComputation;

    fn new_computation(&self) -> FailingComputation {
        FailingComputation { inputs: 0 }
    }
}

/// Best-move callback recording every invocation.
pub fn recording_best_move_callback() -> (BestMoveCallback, Arc<Mutex<Vec<BestMoveInfo>>>) {
    let seen: Arc<Mutex<Vec<BestMoveInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: BestMoveCallback = Box::new(move |info| {
        sink.lock().unwrap().push(*info);
    });
    (callback, seen)
}

/// Visit counts of the root children, in edge order (0 for unspawned).
pub fn root_child_visits(tree: &NodeTree<TicTacToe>) -> Vec<u32> {
    let arena = tree.nodes();
    let root = arena.get(tree.root_id());
    root.children()
        .iter()
        .map(|&child| {
            if child.is_some() {
                arena.get(child).n()
            } else {
                0
            }
        })
        .collect()
}

/// Assert the at-rest tree invariants: no in-flight claims anywhere,
/// every evaluated non-terminal node satisfies `n == Σ children.n + 1`,
/// terminals have no edges, and `|w| ≤ n` throughout.
pub fn assert_tree_invariants(tree: &NodeTree<TicTacToe>) {
    let arena = tree.nodes();
    for node in arena.iter() {
        assert_eq!(node.n_in_flight(), 0, "in-flight claim left behind");
        assert!(
            node.w().abs() <= node.n() as f64 + 1e-6,
            "w out of range: w={} n={}",
            node.w(),
            node.n()
        );
        if node.is_terminal() {
            assert!(node.edges().is_empty(), "terminal node with edges");
            continue;
        }
        if node.n() == 0 {
            continue;
        }
        let child_sum: u32 = node
            .children()
            .iter()
            .map(|&child| {
                if child.is_some() {
                    arena.get(child).n()
                } else {
                    0
                }
            })
            .sum();
        assert_eq!(
            node.n(),
            child_sum + 1,
            "visit accounting broken: n={} children={}",
            node.n(),
            child_sum
        );
    }
}

/// Silence "unused" warnings for fixtures only some test files use.
#[allow(dead_code)]
pub fn seen_count(seen: &Arc<Mutex<Vec<BestMoveInfo>>>) -> usize {
    seen.lock().unwrap().len()
}
