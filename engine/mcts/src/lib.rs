//! Parallel Monte Carlo Tree Search engine for xqzero.
//!
//! Given a position, a neural-network evaluator and a visit/time budget,
//! the engine repeatedly descends a shared search tree, expands frontier
//! positions, batches them for network evaluation, and backs results up —
//! producing a best move and a ponder move.
//!
//! # Overview
//!
//! - [`NodeTree`]: the reusable tree — a root node, the played history,
//!   and `trim_tree_at_head` to advance the root while keeping statistics
//! - [`Search`]: one search over that tree — worker threads, limits, the
//!   stop/abort control plane and final move selection
//! - [`NNCache`]: bounded concurrent cache of network evaluations
//! - [`SearchOptions`]/[`SearchLimits`]: tuning knobs and budgets
//!
//! Workers run a fixed seven-stage iteration (gather a minibatch by PUCT
//! descent under a shared lock, prefetch, one blocking network batch,
//! fetch, backup, counter update). Concurrent descents are steered apart
//! by virtual loss — atomic in-flight counters folded into the PUCT
//! score — rather than by locking paths.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcts::{NNCache, NodeTree, Search, SearchLimits, SearchOptions};
//!
//! let mut tree = NodeTree::new(start_position);
//! let cache = Arc::new(NNCache::new(200_000));
//! let search = Search::new(
//!     &tree,
//!     network,
//!     Some(Box::new(|best| println!("{best}"))),
//!     Some(Box::new(|info| println!("depth {} nodes {}", info.depth, info.nodes))),
//!     SearchLimits::visits(800),
//!     SearchOptions::default(),
//!     Arc::clone(&cache),
//! );
//! search.run_blocking(4)?;
//! let best = search.get_best_move();
//! ```

pub mod cache;
pub mod computation;
pub mod node;
pub mod params;
pub mod search;
pub mod tree;

mod worker;

pub use cache::{CachedEvaluation, NNCache};
pub use computation::CachingComputation;
pub use node::{Edge, Node, NodeId};
pub use params::{SearchLimits, SearchOptions};
pub use search::{Search, SearchError};
pub use tree::{Arena, NodeTree};
