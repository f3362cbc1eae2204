//! Move quality classification.

use crate::evaluation::MATE_SCORE_CP;
use crate::position::is_uci_move;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by the classifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// An input lies outside the range any evaluation can take.
    #[error("Invalid evaluation: {value} centipawns is outside the mate score range")]
    InvalidEvaluation { value: i32 },
    /// The move is not in long algebraic notation.
    #[error("Invalid move: {mv:?}")]
    InvalidMove { mv: String },
}

/// Classification of move quality based on evaluation loss, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveQuality {
    /// The move kept or improved the evaluation
    Brilliant,
    /// The best move in the position
    Best,
    /// Good move (small centipawn loss)
    Good,
    /// Inaccuracy (noticeable centipawn loss)
    Inaccuracy,
    /// Mistake (significant centipawn loss)
    Mistake,
    /// Blunder (major centipawn loss)
    Blunder,
}

impl MoveQuality {
    pub const ALL: [MoveQuality; 6] = [
        MoveQuality::Brilliant,
        MoveQuality::Best,
        MoveQuality::Good,
        MoveQuality::Inaccuracy,
        MoveQuality::Mistake,
        MoveQuality::Blunder,
    ];

    /// Classify a non-negative centipawn loss.
    pub fn from_cp_loss(loss: i32, thresholds: &QualityThresholds) -> Self {
        if loss <= 0 {
            MoveQuality::Brilliant
        } else if loss <= thresholds.best {
            MoveQuality::Best
        } else if loss < thresholds.inaccuracy {
            MoveQuality::Good
        } else if loss < thresholds.mistake {
            MoveQuality::Inaccuracy
        } else if loss < thresholds.blunder {
            MoveQuality::Mistake
        } else {
            MoveQuality::Blunder
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MoveQuality::Brilliant => "brilliant",
            MoveQuality::Best => "best",
            MoveQuality::Good => "good",
            MoveQuality::Inaccuracy => "inaccuracy",
            MoveQuality::Mistake => "mistake",
            MoveQuality::Blunder => "blunder",
        }
    }

    /// Whether the move keeps a best-move streak going.
    pub fn extends_streak(self) -> bool {
        matches!(self, MoveQuality::Brilliant | MoveQuality::Best)
    }

    /// Whether the move counts towards accuracy.
    pub fn is_accurate(self) -> bool {
        self <= MoveQuality::Good
    }
}

impl fmt::Display for MoveQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bounds of the loss tiers, in centipawns.
///
/// A loss of at most `best` is a best move; below `inaccuracy` it is good,
/// below `mistake` an inaccuracy, below `blunder` a mistake, and anything else
/// a blunder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub best: i32,
    pub inaccuracy: i32,
    pub mistake: i32,
    pub blunder: i32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            best: 10,
            inaccuracy: 50,
            mistake: 100,
            blunder: 200,
        }
    }
}

/// Classification of one played move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveClassification {
    /// The move that was played (in UCI notation)
    pub mv: String,
    /// White-relative evaluation before the move
    pub eval_before: i32,
    /// White-relative evaluation after the move
    pub eval_after: i32,
    /// Evaluation lost by the mover, never negative
    pub cp_loss: i32,
    pub quality: MoveQuality,
    pub is_blunder: bool,
}

/// Classify a move from the White-relative evaluations around it.
///
/// Mate scores must already be collapsed to `±MATE_SCORE_CP`.
///
/// # Errors
///
/// Returns [`ClassifyError::InvalidEvaluation`] if either evaluation's magnitude
/// exceeds `MATE_SCORE_CP`, and [`ClassifyError::InvalidMove`] if `mv` is not a
/// UCI move.
pub fn classify_move(
    eval_before: i32,
    eval_after: i32,
    mv: &str,
    player_is_white: bool,
    thresholds: &QualityThresholds,
) -> Result<MoveClassification, ClassifyError> {
    for value in [eval_before, eval_after] {
        if !(-MATE_SCORE_CP..=MATE_SCORE_CP).contains(&value) {
            return Err(ClassifyError::InvalidEvaluation { value });
        }
    }
    if !is_uci_move(mv) {
        return Err(ClassifyError::InvalidMove { mv: mv.to_string() });
    }

    let loss = if player_is_white {
        eval_before - eval_after
    } else {
        eval_after - eval_before
    };
    let cp_loss = loss.max(0);
    let quality = MoveQuality::from_cp_loss(cp_loss, thresholds);

    Ok(MoveClassification {
        mv: mv.to_string(),
        eval_before,
        eval_after,
        cp_loss,
        quality,
        is_blunder: quality == MoveQuality::Blunder,
    })
}

/// Running statistics over a player's classified moves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationTally {
    pub total_moves: u32,
    pub brilliant_moves: u32,
    pub best_moves: u32,
    pub good_moves: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    /// Consecutive brilliant or best moves up to the latest one
    pub best_move_streak: u32,
    pub longest_streak: u32,
    pub total_cp_loss: i64,
}

impl ClassificationTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, classification: &MoveClassification) {
        self.total_moves += 1;
        self.total_cp_loss += i64::from(classification.cp_loss);
        match classification.quality {
            MoveQuality::Brilliant => self.brilliant_moves += 1,
            MoveQuality::Best => self.best_moves += 1,
            MoveQuality::Good => self.good_moves += 1,
            MoveQuality::Inaccuracy => self.inaccuracies += 1,
            MoveQuality::Mistake => self.mistakes += 1,
            MoveQuality::Blunder => self.blunders += 1,
        }

        if classification.quality.extends_streak() {
            self.best_move_streak += 1;
            self.longest_streak = self.longest_streak.max(self.best_move_streak);
        } else {
            self.best_move_streak = 0;
        }
    }

    pub fn count(&self, quality: MoveQuality) -> u32 {
        match quality {
            MoveQuality::Brilliant => self.brilliant_moves,
            MoveQuality::Best => self.best_moves,
            MoveQuality::Good => self.good_moves,
            MoveQuality::Inaccuracy => self.inaccuracies,
            MoveQuality::Mistake => self.mistakes,
            MoveQuality::Blunder => self.blunders,
        }
    }

    /// Share of brilliant, best and good moves, in percent. 100 before any move.
    pub fn accuracy_percent(&self) -> f64 {
        if self.total_moves == 0 {
            return 100.0;
        }
        let accurate = self.brilliant_moves + self.best_moves + self.good_moves;
        f64::from(accurate) * 100.0 / f64::from(self.total_moves)
    }

    pub fn average_cp_loss(&self) -> f64 {
        if self.total_moves == 0 {
            return 0.0;
        }
        self.total_cp_loss as f64 / f64::from(self.total_moves)
    }
}
