//! Positions and moves as the analyzer sees them: opaque, validated strings.
//!
//! The analyzer never interprets board contents. It only checks that a position
//! string can travel safely on one protocol line, and reads the active-colour
//! field so that engine scores can be reported from White's point of view.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Reasons a position string is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    /// The position string is empty or only whitespace.
    #[error("Position is empty")]
    Empty,
    /// The position string contains a line break or other control character.
    #[error("Position contains control characters")]
    ControlCharacter,
    /// The position string has more fields than FEN allows.
    #[error("Position has {0} fields, expected at most 6")]
    TooManyFields(usize),
}

/// A side in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

/// A board position in standard FEN notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position(String);

impl Position {
    /// Validate and wrap a position string. Surrounding whitespace is trimmed.
    pub fn new(fen: impl AsRef<str>) -> Result<Self, PositionError> {
        let fen = fen.as_ref().trim();
        if fen.is_empty() {
            return Err(PositionError::Empty);
        }
        if fen.chars().any(char::is_control) {
            return Err(PositionError::ControlCharacter);
        }
        let fields = fen.split_whitespace().count();
        if fields > 6 {
            return Err(PositionError::TooManyFields(fields));
        }
        // Collapse runs of spaces so the string is a canonical protocol argument.
        Ok(Position(fen.split_whitespace().collect::<Vec<_>>().join(" ")))
    }

    /// The standard starting position.
    pub fn starting() -> Self {
        Position(STARTING_FEN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The side to move, read from the active-colour field.
    ///
    /// Returns `None` when the field is missing or is not `w`/`b`.
    pub fn side_to_move(&self) -> Option<Side> {
        match self.0.split_whitespace().nth(1) {
            Some("w") => Some(Side::White),
            Some("b") => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `mv` is a long-algebraic move as used by UCI (`e2e4`, `e7e8q`, `0000`).
pub fn is_uci_move(mv: &str) -> bool {
    if mv == "0000" {
        return true;
    }
    let b = mv.as_bytes();
    let square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);
    match b.len() {
        4 => square(b[0], b[1]) && square(b[2], b[3]),
        5 => square(b[0], b[1]) && square(b[2], b[3]) && matches!(b[4], b'q' | b'r' | b'b' | b'n'),
        _ => false,
    }
}
