//! Tic-tac-toe as a [`Position`] implementation.
//!
//! The engine treats real Xiangqi move generation as an external
//! collaborator; this crate provides the smallest deterministic game that
//! exercises every part of the search: branching, terminal wins, draws,
//! and exact position fingerprints. Red plays first (X).
//!
//! Moves reuse the engine's coordinate encoding with `from == to`: a move
//! "places" on the target square. Cells map to squares 0..9.

use xqzero_core::{Color, GameResult, Move, Position, Square};

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicTacToe {
    cells: [Option<Color>; 9],
    stm: Color,
}

impl TicTacToe {
    pub fn new() -> TicTacToe {
        TicTacToe {
            cells: [None; 9],
            stm: Color::Red,
        }
    }

    /// Position after the given placement sequence, alternating from Red.
    /// Panics on an occupied cell; test setup convenience.
    pub fn from_placements(cells: &[usize]) -> TicTacToe {
        let mut game = TicTacToe::new();
        for &cell in cells {
            assert!(game.cells[cell].is_none(), "cell {cell} already taken");
            game = game.play(Move::new(Square::new(cell as u8), Square::new(cell as u8)));
        }
        game
    }

    /// The move that places on `cell`.
    pub fn placement(cell: usize) -> Move {
        Move::new(Square::new(cell as u8), Square::new(cell as u8))
    }

    pub fn cell(&self, index: usize) -> Option<Color> {
        self.cells[index]
    }

    fn winner(&self) -> Option<Color> {
        for line in LINES {
            if let Some(color) = self.cells[line[0]] {
                if self.cells[line[1]] == Some(color) && self.cells[line[2]] == Some(color) {
                    return Some(color);
                }
            }
        }
        None
    }
}

impl Default for TicTacToe {
    fn default() -> Self {
        TicTacToe::new()
    }
}

impl Position for TicTacToe {
    fn legal_moves(&self) -> Vec<Move> {
        if self.winner().is_some() {
            return Vec::new();
        }
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_none())
            .map(|(i, _)| TicTacToe::placement(i))
            .collect()
    }

    fn play(&self, mv: Move) -> TicTacToe {
        let mut next = *self;
        debug_assert!(next.cells[mv.to().index()].is_none());
        next.cells[mv.to().index()] = Some(self.stm);
        next.stm = self.stm.opponent();
        next
    }

    fn side_to_move(&self) -> Color {
        self.stm
    }

    fn hash(&self) -> u64 {
        // Base-3 board fold plus the side to move: exact, collision-free.
        let mut hash: u64 = 0;
        for cell in self.cells {
            hash = hash * 3
                + match cell {
                    None => 0,
                    Some(Color::Red) => 1,
                    Some(Color::Black) => 2,
                };
        }
        hash * 2
            + match self.stm {
                Color::Red => 0,
                Color::Black => 1,
            }
    }

    fn result(&self) -> GameResult {
        match self.winner() {
            Some(Color::Red) => GameResult::RedWon,
            Some(Color::Black) => GameResult::BlackWon,
            None => {
                if self.cells.iter().all(|c| c.is_some()) {
                    GameResult::Draw
                } else {
                    GameResult::Undecided
                }
            }
        }
    }
}
