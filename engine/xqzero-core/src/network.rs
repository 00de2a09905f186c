//! Neural-network backend interface.
//!
//! The engine is backend-agnostic: it asks a [`Network`] for a fresh
//! [`NetworkComputation`] per worker iteration, queues positions into it,
//! runs the batch once, then reads a value and per-move policy scores out.
//! Policy scores are raw (unnormalized) — the search applies softmax with
//! its own temperature at expansion time.

use thiserror::Error;

use crate::moves::Move;
use crate::position::{Position, PositionHistory};

/// Errors surfaced by a network backend.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("backend computation failed: {0}")]
    Backend(String),

    #[error("backend returned {got} results for {expected} inputs")]
    OutputMismatch { expected: usize, got: usize },
}

/// One batched evaluation. Inputs are queued with [`add_input`], evaluated
/// together by [`compute_blocking`], and read back by index in queue order.
///
/// [`add_input`]: NetworkComputation::add_input
/// [`compute_blocking`]: NetworkComputation::compute_blocking
pub trait NetworkComputation<P: Position> {
    /// Queue the current position (with as much history as the backend
    /// wants to encode) for evaluation.
    fn add_input(&mut self, history: &PositionHistory<P>);

    /// Run the backend on everything queued so far. Blocks until results
    /// are available.
    fn compute_blocking(&mut self) -> Result<(), NetworkError>;

    /// Number of inputs queued.
    fn batch_size(&self) -> usize;

    /// Value head output for input `idx`, in [-1, 1], from the perspective
    /// of the side to move in that position.
    fn q(&self, idx: usize) -> f32;

    /// Raw policy score for `mv` in input `idx`.
    fn p(&self, idx: usize, mv: Move) -> f32;
}

/// A neural network that can serve concurrent computations.
pub trait Network<P: Position>: Send + Sync + 'static {
    type Computation: NetworkComputation<P> + Send;

    fn new_computation(&self) -> Self::Computation;
}

/// Backend stub returning a flat policy and a neutral value for every
/// position. Useful for exercising the search without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> UniformNetwork {
        UniformNetwork
    }
}

/// Computation produced by [`UniformNetwork`].
#[derive(Debug, Default)]
pub struct UniformComputation {
    inputs: usize,
}

impl<P: Position> NetworkComputation<P> for UniformComputation {
    fn add_input(&mut self, _history: &PositionHistory<P>) {
        self.inputs += 1;
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
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

impl<P: Position> Network<P> for UniformNetwork {
    type Computation = UniformComputation;

    fn new_computation(&self) -> UniformComputation {
        UniformComputation::default()
    }
}
