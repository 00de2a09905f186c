//! Callback payloads emitted by a running search.

use std::fmt;

use crate::moves::Move;

/// Final result of a search, emitted exactly once unless the search was
/// aborted. `best` is `None` only when the root has no legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestMoveInfo {
    pub best: Option<Move>,
    /// Predicted reply to `best`, when the tree is deep enough to know one.
    pub ponder: Option<Move>,
}

impl fmt::Display for BestMoveInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.best, self.ponder) {
            (Some(best), Some(ponder)) => write!(f, "bestmove {best} ponder {ponder}"),
            (Some(best), None) => write!(f, "bestmove {best}"),
            (None, _) => write!(f, "bestmove (none)"),
        }
    }
}

/// Periodic progress report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThinkingInfo {
    /// Average playout depth.
    pub depth: u32,
    /// Deepest playout so far.
    pub seldepth: u32,
    pub time_ms: u64,
    /// Total visits at the root, including reused ones.
    pub nodes: u64,
    pub nps: u64,
    /// Score in centipawns, from the side to move's perspective.
    pub score_cp: i32,
    pub pv: Vec<Move>,
}

pub type BestMoveCallback = Box<dyn Fn(&BestMoveInfo) + Send + Sync>;
pub type InfoCallback = Box<dyn Fn(&ThinkingInfo) + Send + Sync>;
