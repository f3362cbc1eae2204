//! Parsing of streaming engine output.
//!
//! Both functions are pure and report scores exactly as the engine sent them,
//! i.e. relative to the side to move.

use crate::analysis::AnalysisResult;
use uci::{EngineInfo, EngineMessage};

/// Final reply of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    /// The chosen move, `None` when the engine had no legal move (`bestmove (none)`).
    pub mv: Option<String>,
    /// The reply the engine expects, if it said so.
    pub ponder: Option<String>,
}

/// Parse a UCI `info` line into an [`AnalysisResult`].
///
/// Recognizes `depth`, `score cp <n>`, `score mate <n>`, `nodes`, `nps` and a
/// trailing `pv <move>...`, whose first move becomes the best move. Unknown tokens
/// are skipped, and fields missing from the line stay zero-valued.
///
/// Returns `None` if the line is not an `info` line.
pub fn parse_info_line(line: &str) -> Option<AnalysisResult> {
    let info = EngineInfo::parse(line)?;
    let mut result = AnalysisResult::default();
    result.apply_info(&info);
    Some(result)
}

/// Parse a `bestmove <move> [ponder <move>]` line.
///
/// Returns `None` if the line is not a `bestmove` line.
pub fn parse_bestmove_line(line: &str) -> Option<BestMove> {
    match EngineMessage::parse(line)? {
        EngineMessage::BestMove { mv, ponder } => Some(BestMove {
            mv: (mv != "(none)" && mv != "0000").then_some(mv),
            ponder,
        }),
        _ => None,
    }
}
