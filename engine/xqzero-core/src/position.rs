//! Position and history interfaces.
//!
//! The engine never generates moves itself: it consumes a [`Position`]
//! implementation that enumerates legal moves, applies them, hashes itself
//! and adjudicates its own terminal rules. [`PositionHistory`] records the
//! played sequence, layers repetition detection over position fingerprints,
//! and builds the multi-ply hashes used as evaluation-cache keys.

use crate::moves::{Color, Move};

/// Outcome of a finished game, or `Undecided` while in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Undecided,
    RedWon,
    Draw,
    BlackWon,
}

impl GameResult {
    /// Value of this result in {-1, 0, +1} from `side`'s perspective.
    /// `Undecided` has no value and maps to 0.
    pub fn value_for(self, side: Color) -> f32 {
        match self {
            GameResult::Undecided | GameResult::Draw => 0.0,
            GameResult::RedWon => {
                if side == Color::Red {
                    1.0
                } else {
                    -1.0
                }
            }
            GameResult::BlackWon => {
                if side == Color::Black {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// A game position as seen by the search engine.
///
/// Implementations must be cheap to clone (the search keeps a scratch line
/// of positions per worker) and must produce a stable 64-bit fingerprint:
/// two positions with equal fingerprints are treated as transpositions by
/// the evaluation cache.
pub trait Position: Clone + Send + Sync + 'static {
    /// All legal moves, in a stable generation order. The order is
    /// significant: the search breaks ties by it.
    fn legal_moves(&self) -> Vec<Move>;

    /// The position after playing `mv`. `mv` must be legal.
    fn play(&self, mv: Move) -> Self;

    fn side_to_move(&self) -> Color;

    /// Stable fingerprint of this position.
    fn hash(&self) -> u64;

    /// This position's own terminal adjudication (checkmate, stalemate,
    /// bare-rule draws). Repetition across the game is layered on top by
    /// [`PositionHistory::compute_game_result`].
    fn result(&self) -> GameResult;
}

/// The sequence of positions played so far, oldest first.
#[derive(Debug, Clone)]
pub struct PositionHistory<P> {
    positions: Vec<P>,
}

impl<P: Position> PositionHistory<P> {
    pub fn new(start: P) -> PositionHistory<P> {
        PositionHistory {
            positions: vec![start],
        }
    }

    /// Current (most recent) position.
    pub fn last(&self) -> &P {
        // Invariant: positions is never empty.
        self.positions.last().unwrap()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of moves played since the starting position.
    pub fn ply(&self) -> usize {
        self.positions.len() - 1
    }

    /// Full-move number, starting at 1.
    pub fn move_number(&self) -> usize {
        self.ply() / 2 + 1
    }

    pub fn append(&mut self, mv: Move) {
        let next = self.last().play(mv);
        self.positions.push(next);
    }

    /// Drop the most recent position. The starting position is never
    /// popped.
    pub fn pop(&mut self) {
        if self.positions.len() > 1 {
            self.positions.pop();
        }
    }

    /// Truncate back to `len` positions (no-op if already shorter).
    pub fn trim(&mut self, len: usize) {
        let len = len.max(1);
        self.positions.truncate(len);
    }

    /// Terminal adjudication for the current position: the position's own
    /// result first, then a draw once the same fingerprint has occurred
    /// three times in the played line.
    pub fn compute_game_result(&self) -> GameResult {
        let result = self.last().result();
        if result != GameResult::Undecided {
            return result;
        }
        let hash = self.last().hash();
        let occurrences = self.positions.iter().filter(|p| p.hash() == hash).count();
        if occurrences >= 3 {
            GameResult::Draw
        } else {
            GameResult::Undecided
        }
    }

    /// Fingerprint of the last `plies` positions combined, newest last.
    /// Used as the evaluation-cache key; `plies == 1` hashes only the
    /// current position.
    pub fn hash_last(&self, plies: usize) -> u64 {
        let plies = plies.max(1).min(self.positions.len());
        let start = self.positions.len() - plies;
        let mut hash: u64 = 0;
        for p in &self.positions[start..] {
            hash = hash
                .rotate_left(13)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                ^ p.hash();
        }
        hash
    }
}
