//! Snapshots of engine analysis.

use crate::evaluation::{Evaluation, MATE_SCORE_CP};
use crate::position::Side;
use serde::Serialize;
use uci::EngineInfo;

/// Identifies one requested search. Issued by `LiveAnalyzer::set_position`,
/// starting at 1; `0` tags results that belong to no search.
pub type SearchId = u64;

/// One snapshot of engine evaluation.
///
/// Results read from the analyzer report `score` from White's point of view.
/// Results produced by [`parse_info_line`](crate::parser::parse_info_line) are
/// raw engine output, relative to the side to move.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnalysisResult {
    /// Search depth reached.
    pub depth: u32,
    /// Position evaluation.
    pub score: Evaluation,
    /// Best move in UCI notation, empty if none is known yet.
    pub best_move: String,
    /// Principal variation, best move first.
    pub principal_variation: Vec<String>,
    /// Nodes searched.
    pub nodes: u64,
    /// Search speed in nodes per second.
    pub nodes_per_second: u64,
    /// The search this result belongs to.
    pub search_id: SearchId,
    /// Side to move in the analysed position, when the position says so.
    pub side_to_move: Option<Side>,
    /// Set on the result produced by the engine's `bestmove` reply.
    pub is_final: bool,
}

impl AnalysisResult {
    pub fn is_mate(&self) -> bool {
        self.score.is_mate()
    }

    /// The score as centipawns, with mate scores clamped to `±MATE_SCORE_CP`.
    ///
    /// `Mate(0)` is resolved with [`side_to_move`](Self::side_to_move): the side
    /// to move is the one that has been mated.
    pub fn score_cp(&self) -> i32 {
        match (self.score, self.side_to_move) {
            (Evaluation::Mate(0), Some(Side::Black)) => MATE_SCORE_CP,
            (score, _) => score.to_centipawns(),
        }
    }

    /// Signed mate distance, if the score is a mate score.
    pub fn score_mate(&self) -> Option<i32> {
        self.score.mate_in()
    }

    /// Merge an `info` line into this result. Fields absent from the line keep
    /// their current values.
    pub fn apply_info(&mut self, info: &EngineInfo) {
        if let Some(depth) = info.depth {
            self.depth = depth;
        }
        if let Some(score) = info.score {
            self.score = score.into();
        }
        if let Some(nodes) = info.nodes {
            self.nodes = nodes;
        }
        if let Some(nps) = info.nps {
            self.nodes_per_second = nps;
        }
        if let Some(first) = info.pv.first() {
            self.best_move = first.clone();
            self.principal_variation = info.pv.clone();
        }
    }

    /// Re-express a raw engine result from White's point of view.
    pub fn to_white_perspective(&self, side_to_move: Option<Side>) -> AnalysisResult {
        let mut out = self.clone();
        if side_to_move == Some(Side::Black) {
            out.score = out.score.flip();
        }
        out.side_to_move = side_to_move;
        out
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        let best = if self.best_move.is_empty() {
            "-"
        } else {
            self.best_move.as_str()
        };
        format!(
            "depth {} | eval {} | best {} | pv {}",
            self.depth,
            self.score,
            best,
            self.principal_variation
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uci::InfoBuilder;

    #[test]
    fn test_default_is_zero_valued() {
        let result = AnalysisResult::default();
        assert_eq!(result.depth, 0);
        assert_eq!(result.score_cp(), 0);
        assert!(!result.is_mate());
        assert!(result.best_move.is_empty());
        assert!(result.principal_variation.is_empty());
        assert_eq!(result.search_id, 0);
        assert!(!result.is_final);
    }

    #[test]
    fn test_apply_info_merges_present_fields() {
        let mut result = AnalysisResult::default();
        result.apply_info(
            &InfoBuilder::new()
                .depth(8)
                .score_cp(20)
                .nodes(1000)
                .pv(["d2d4", "d7d5"])
                .build(),
        );
        result.apply_info(&InfoBuilder::new().depth(9).nps(12345).build());

        assert_eq!(result.depth, 9);
        assert_eq!(result.score, Evaluation::Centipawns(20));
        assert_eq!(result.nodes, 1000);
        assert_eq!(result.nodes_per_second, 12345);
        assert_eq!(result.best_move, "d2d4");
        assert_eq!(result.principal_variation, vec!["d2d4", "d7d5"]);
    }

    #[test]
    fn test_to_white_perspective() {
        let raw = AnalysisResult {
            score: Evaluation::Centipawns(80),
            ..Default::default()
        };
        let black = raw.to_white_perspective(Some(Side::Black));
        assert_eq!(black.score, Evaluation::Centipawns(-80));
        assert_eq!(black.side_to_move, Some(Side::Black));

        let white = raw.to_white_perspective(Some(Side::White));
        assert_eq!(white.score, Evaluation::Centipawns(80));

        let unknown = raw.to_white_perspective(None);
        assert_eq!(unknown.score, Evaluation::Centipawns(80));
    }

    #[test]
    fn test_score_cp_clamps_mate() {
        let result = AnalysisResult {
            score: Evaluation::Mate(-3),
            ..Default::default()
        };
        assert!(result.is_mate());
        assert_eq!(result.score_mate(), Some(-3));
        assert_eq!(result.score_cp(), -MATE_SCORE_CP);
    }

    #[test]
    fn test_score_cp_checkmated_side() {
        let black_mated = AnalysisResult {
            score: Evaluation::Mate(0),
            side_to_move: Some(Side::Black),
            ..Default::default()
        };
        assert_eq!(black_mated.score_cp(), MATE_SCORE_CP);

        let white_mated = AnalysisResult {
            score: Evaluation::Mate(0),
            side_to_move: Some(Side::White),
            ..Default::default()
        };
        assert_eq!(white_mated.score_cp(), -MATE_SCORE_CP);
    }

    #[test]
    fn test_summary() {
        let result = AnalysisResult {
            depth: 12,
            score: Evaluation::Centipawns(34),
            best_move: "e2e4".to_string(),
            principal_variation: vec!["e2e4".to_string(), "e7e5".to_string()],
            ..Default::default()
        };
        assert_eq!(result.summary(), "depth 12 | eval +0.34 | best e2e4 | pv e2e4 e7e5");
        assert!(AnalysisResult::default().summary().contains("best -"));
    }
}
