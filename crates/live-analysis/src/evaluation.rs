//! Chess position evaluation types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Centipawn value standing in for a forced mate when a mate score has to be
/// compared against centipawn scores.
pub const MATE_SCORE_CP: i32 = 30_000;

/// Represents a chess position evaluation.
///
/// Evaluations can be either centipawn scores (for normal positions)
/// or mate scores (when a forced mate is found). The perspective depends on
/// where the value came from: raw engine output is relative to the side to
/// move, results published by the analysis loop are relative to White.
///
/// `Mate(0)` means the side to move is already checkmated. It has no sign of its
/// own, so [`flip`](Self::flip) leaves it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evaluation {
    /// Centipawn evaluation.
    Centipawns(i32),
    /// Mate in N moves (positive = the evaluated side mates, negative = it gets mated).
    Mate(i32),
}

impl Default for Evaluation {
    fn default() -> Self {
        Evaluation::Centipawns(0)
    }
}

impl Evaluation {
    /// Collapse to centipawns, mapping mate scores to `±MATE_SCORE_CP`.
    ///
    /// `Mate(0)` maps to `-MATE_SCORE_CP`: the side to move has lost.
    pub fn to_centipawns(self) -> i32 {
        match self {
            Evaluation::Centipawns(cp) => cp,
            Evaluation::Mate(m) if m > 0 => MATE_SCORE_CP,
            Evaluation::Mate(_) => -MATE_SCORE_CP,
        }
    }

    /// The same evaluation seen from the other side.
    pub fn flip(self) -> Self {
        match self {
            Evaluation::Centipawns(cp) => Evaluation::Centipawns(-cp),
            Evaluation::Mate(m) => Evaluation::Mate(-m),
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Evaluation::Mate(_))
    }

    /// The centipawn value, if this is not a mate score.
    pub fn centipawns(self) -> Option<i32> {
        match self {
            Evaluation::Centipawns(cp) => Some(cp),
            Evaluation::Mate(_) => None,
        }
    }

    /// The signed mate distance, if this is a mate score.
    pub fn mate_in(self) -> Option<i32> {
        match self {
            Evaluation::Centipawns(_) => None,
            Evaluation::Mate(m) => Some(m),
        }
    }
}

impl From<uci::Score> for Evaluation {
    fn from(score: uci::Score) -> Self {
        match score {
            uci::Score::Cp(cp) => Evaluation::Centipawns(cp),
            uci::Score::Mate(m) => Evaluation::Mate(m),
        }
    }
}

/// Formats the evaluation the way the eval bar labels it: `+0.34`, `-1.50`, `M3`, `-M2`.
impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Evaluation::Centipawns(cp) => write!(f, "{:+.2}", cp as f64 / 100.0),
            Evaluation::Mate(m) if m > 0 => write!(f, "M{}", m),
            Evaluation::Mate(m) => write!(f, "-M{}", m.abs()),
        }
    }
}
