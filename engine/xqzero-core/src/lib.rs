//! Core types and external-collaborator interfaces for the xqzero engine.
//!
//! This crate defines the contract between the search engine and the
//! components it treats as pluggable:
//!
//! - `Square`/`Move`/`Color`: compact encodings for the 9×10 Xiangqi board
//! - `Position`: move generation, legality and terminal detection
//! - `PositionHistory`: the played sequence, repetition detection and
//!   multi-ply fingerprints used as cache keys
//! - `Network`/`NetworkComputation`: the batched neural-network backend
//! - `BestMoveInfo`/`ThinkingInfo`: callback payloads emitted by a search
//!
//! The search engine itself lives in the `mcts` crate.

pub mod callbacks;
pub mod moves;
pub mod network;
pub mod position;

pub use callbacks::{BestMoveCallback, BestMoveInfo, InfoCallback, ThinkingInfo};
pub use moves::{Color, Move, Square};
pub use network::{Network, NetworkComputation, NetworkError, UniformNetwork};
pub use position::{GameResult, Position, PositionHistory};
