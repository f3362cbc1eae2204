//! Continuous position analysis for an interactive game.
//!
//! [`LiveAnalyzer`] is the handle the game loop owns. Every call on it returns
//! immediately except [`start`](LiveAnalyzer::start), which runs the engine
//! handshake, and [`stop`](LiveAnalyzer::stop), which waits a bounded time for
//! the worker to exit. If the engine cannot be started or dies mid-game, the
//! analyzer reports itself unavailable and keeps serving the last result.

use crate::analysis::{AnalysisResult, SearchId};
use crate::channel::{result_channel, LatestResult, ResultSender};
use crate::config::{AnalyzerConfig, EvalAfterMode};
use crate::engine::{handshake, EngineConnection, EngineProcess};
use crate::position::{is_uci_move, Position, PositionError};
use crate::quality::{self, ClassifyError, MoveClassification};
use crate::worker::{self, Shared, WorkerHandle, WorkerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors returned by the analyzer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// No engine is running.
    #[error("Engine analysis is unavailable")]
    Unavailable,
    /// The position string was rejected.
    #[error("Invalid position: {0}")]
    Position(#[from] PositionError),
    /// The move is not in long algebraic notation.
    #[error("Invalid move: {0:?}")]
    Move(String),
    /// The engine has not yet reported on the position last set.
    #[error("No evaluation of the current position yet")]
    NotEvaluated,
    /// The move could not be classified.
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),
}

/// A move waiting for the evaluation of the position it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub mv: String,
    pub player_is_white: bool,
    /// White-relative evaluation before the move.
    pub eval_before: i32,
    /// Search started for the position after the move.
    pub search_id: SearchId,
}

/// A background engine analysing whatever position it was last given.
pub struct LiveAnalyzer {
    config: AnalyzerConfig,
    shared: Arc<Shared>,
    sender: ResultSender,
    results: LatestResult,
    worker: Option<WorkerHandle>,
    engine_name: Option<String>,
}

impl LiveAnalyzer {
    /// Create an analyzer. No engine is started until [`start`](Self::start).
    pub fn new(config: AnalyzerConfig) -> Self {
        let (sender, results) = result_channel(config.result_capacity);
        Self {
            config,
            shared: Arc::new(Shared::new()),
            sender,
            results,
            worker: None,
            engine_name: None,
        }
    }

    /// Create an analyzer for the engine at `engine_path` searching to `depth`,
    /// with every other setting at its default.
    pub fn with_engine(engine_path: impl Into<PathBuf>, depth: u32) -> Self {
        Self::new(AnalyzerConfig {
            engine_path: engine_path.into(),
            depth,
            ..AnalyzerConfig::default()
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Spawn the configured engine, run the handshake and start the worker.
    ///
    /// Returns whether analysis is available. Failure is logged and leaves the
    /// analyzer in unavailable mode; it is never an error for the caller.
    pub fn start(&mut self) -> bool {
        match EngineProcess::spawn(&self.config.engine_path, &self.config.engine_args) {
            Ok(process) => self.start_with(process),
            Err(e) => {
                warn!(
                    engine = %self.config.engine_path.display(),
                    error = %e,
                    "Engine unavailable, continuing without analysis"
                );
                false
            }
        }
    }

    /// Like [`start`](Self::start), on an already established connection.
    pub fn start_with<C: EngineConnection + 'static>(&mut self, mut conn: C) -> bool {
        self.stop();

        let identity = match handshake(
            &mut conn,
            self.config.handshake_timeout(),
            &self.config.engine_options(),
        ) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Engine handshake failed, continuing without analysis");
                conn.terminate(self.config.quit_grace());
                return false;
            }
        };

        // Ids keep increasing across restarts so results already in the channel
        // never pass for answers to new requests.
        let shared = Arc::new(Shared::continuing_from(self.shared.last_requested()));
        shared.set_available(true);
        let settings = WorkerSettings {
            go: self.config.go_options(),
            idle_wake: self.config.idle_wake(),
            poll_interval: self.config.poll_interval(),
            stop_timeout: self.config.stop_timeout(),
            quit_grace: self.config.quit_grace(),
        };

        match worker::spawn(conn, Arc::clone(&shared), self.sender.clone(), settings) {
            Ok(handle) => {
                info!(
                    engine = identity.name.as_deref().unwrap_or("unknown"),
                    depth = self.config.depth,
                    "Engine analysis started"
                );
                self.shared = shared;
                self.worker = Some(handle);
                self.engine_name = identity.name;
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to start analysis worker");
                false
            }
        }
    }

    /// Whether the engine is running. Turns false if the engine dies.
    pub fn is_available(&self) -> bool {
        self.shared.is_available()
    }

    /// The name the engine reported in its handshake.
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    /// Ask for `fen` to be analysed, replacing any search in progress.
    ///
    /// Returns the id that results for this position will carry.
    ///
    /// # Errors
    ///
    /// - `AnalyzerError::Unavailable` if no engine is running
    /// - `AnalyzerError::Position` if `fen` cannot be sent to an engine
    pub fn set_position(&self, fen: &str) -> Result<SearchId, AnalyzerError> {
        if !self.is_available() {
            return Err(AnalyzerError::Unavailable);
        }
        let position = Position::new(fen)?;
        Ok(self.shared.request(position))
    }

    /// The newest result, White-relative. Never blocks; before any analysis it
    /// is a zero-valued result.
    pub fn get_latest(&mut self) -> AnalysisResult {
        self.results.get_latest()
    }

    /// Classify a move with the configured thresholds.
    pub fn classify_move(
        &self,
        eval_before: i32,
        eval_after: i32,
        mv: &str,
        player_is_white: bool,
    ) -> Result<MoveClassification, ClassifyError> {
        quality::classify_move(
            eval_before,
            eval_after,
            mv,
            player_is_white,
            &self.config.thresholds,
        )
    }

    /// Record that `mv` was played, leading to `fen_after`, and start analysing
    /// the new position. Poll the returned ticket with
    /// [`poll_classification`](Self::poll_classification).
    ///
    /// The evaluation before the move is the latest result for the position
    /// last passed to [`set_position`](Self::set_position). Before any position
    /// has been set it is zero.
    ///
    /// # Errors
    ///
    /// - `AnalyzerError::Move` if `mv` is not a UCI move
    /// - `AnalyzerError::Unavailable` if no engine is running
    /// - `AnalyzerError::NotEvaluated` if the engine has not reported on the
    ///   previous position yet; nothing is sent to the engine in that case
    /// - `AnalyzerError::Position` if `fen_after` cannot be sent to an engine
    pub fn submit_move(
        &mut self,
        fen_after: &str,
        mv: &str,
        player_is_white: bool,
    ) -> Result<PendingMove, AnalyzerError> {
        if !is_uci_move(mv) {
            return Err(AnalyzerError::Move(mv.to_string()));
        }
        if !self.is_available() {
            return Err(AnalyzerError::Unavailable);
        }
        let latest = self.get_latest();
        if latest.search_id < self.shared.last_requested() {
            return Err(AnalyzerError::NotEvaluated);
        }
        let eval_before = latest.score_cp();
        let search_id = self.set_position(fen_after)?;
        Ok(PendingMove {
            mv: mv.to_string(),
            player_is_white,
            eval_before,
            search_id,
        })
    }

    /// Classify a submitted move once an evaluation of its position is known.
    ///
    /// With [`EvalAfterMode::AwaitFresh`] this returns `None` until the engine
    /// has reported on the new position (or a later one).
    pub fn poll_classification(
        &mut self,
        pending: &PendingMove,
    ) -> Option<Result<MoveClassification, AnalyzerError>> {
        let eval_after = match self.config.eval_after {
            EvalAfterMode::NegatePrevious => -pending.eval_before,
            EvalAfterMode::AwaitFresh => {
                let latest = self.get_latest();
                if latest.search_id < pending.search_id {
                    return None;
                }
                latest.score_cp()
            }
        };
        Some(
            self.classify_move(
                pending.eval_before,
                eval_after,
                &pending.mv,
                pending.player_is_white,
            )
            .map_err(AnalyzerError::from),
        )
    }

    /// Shut the worker and engine down; safe to call more than once.
    ///
    /// Waits at most [`AnalyzerConfig::shutdown_bound`]: the worker sends `quit`
    /// and gives the engine its quit grace before it exits. Past that bound the
    /// engine is killed and the worker thread is left detached.
    pub fn stop(&mut self) {
        self.shared.request_shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join(self.config.shutdown_bound()) {
                info!("Engine analysis stopped");
            }
        }
        self.shared.set_available(false);
    }
}

impl Drop for LiveAnalyzer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{ScriptedEngine, SearchReply};
    use std::time::{Duration, Instant};
    use uci::InfoBuilder;

    fn fast_config() -> AnalyzerConfig {
        AnalyzerConfig {
            depth: 10,
            handshake_timeout_ms: 200,
            idle_wake_ms: 20,
            poll_interval_ms: 5,
            quit_grace_ms: 0,
            ..AnalyzerConfig::default()
        }
    }

    fn wait_for_final(analyzer: &mut LiveAnalyzer, search_id: SearchId) -> AnalysisResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let latest = analyzer.get_latest();
            if latest.search_id == search_id && latest.is_final {
                return latest;
            }
            assert!(Instant::now() < deadline, "no final result for search {}", search_id);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_analyzer_error_display() {
        assert_eq!(
            AnalyzerError::Unavailable.to_string(),
            "Engine analysis is unavailable"
        );
        let err = AnalyzerError::from(PositionError::Empty);
        assert!(err.to_string().contains("Invalid position"));
    }

    #[test]
    fn test_unavailable_before_start() {
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(!analyzer.is_available());
        assert_eq!(
            analyzer.set_position(crate::STARTING_FEN),
            Err(AnalyzerError::Unavailable)
        );
        assert_eq!(analyzer.get_latest(), AnalysisResult::default());
    }

    #[test]
    fn test_start_with_scripted_engine() {
        let engine = ScriptedEngine::new().with_name("Scripted 2.0").default_reply(
            SearchReply::new()
                .info(InfoBuilder::new().depth(10).score_cp(34).pv(["e2e4", "e7e5"]).build())
                .best_move("e2e4"),
        );
        let mut analyzer = LiveAnalyzer::new(fast_config());

        assert!(analyzer.start_with(engine));
        assert!(analyzer.is_available());
        assert_eq!(analyzer.engine_name(), Some("Scripted 2.0"));

        let id = analyzer.set_position(crate::STARTING_FEN).unwrap();
        let result = wait_for_final(&mut analyzer, id);
        assert_eq!(result.best_move, "e2e4");
        assert_eq!(result.score_cp(), 34);
        assert_eq!(result.depth, 10);

        analyzer.stop();
        assert!(!analyzer.is_available());
    }

    #[test]
    fn test_handshake_failure_leaves_unavailable() {
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(!analyzer.start_with(ScriptedEngine::new().silent()));
        assert!(!analyzer.is_available());
    }

    #[test]
    fn test_set_position_rejects_multiline() {
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(analyzer.start_with(ScriptedEngine::new()));
        assert_eq!(
            analyzer.set_position("8/8/8/8/8/8/8/K1k5 w - - 0 1\nquit"),
            Err(AnalyzerError::Position(PositionError::ControlCharacter))
        );
    }

    #[test]
    fn test_classify_move_uses_configured_thresholds() {
        let mut config = fast_config();
        config.thresholds.blunder = 500;
        let analyzer = LiveAnalyzer::new(config);

        let c = analyzer.classify_move(100, -150, "e2e4", true).unwrap();
        assert_eq!(c.cp_loss, 250);
        assert_eq!(c.quality, quality::MoveQuality::Mistake);
        assert!(analyzer.classify_move(40_000, 0, "e2e4", true).is_err());
    }

    #[test]
    fn test_submit_move_rejects_malformed_move() {
        let engine = ScriptedEngine::new();
        let log = engine.command_log();
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(analyzer.start_with(engine));

        assert_eq!(
            analyzer.submit_move(crate::STARTING_FEN, "foo\nquit", true),
            Err(AnalyzerError::Move("foo\nquit".to_string()))
        );
        assert_eq!(log.count_prefix("position"), 0);
        assert!(matches!(
            analyzer.classify_move(0, 0, "e2", true),
            Err(ClassifyError::InvalidMove { .. })
        ));
    }

    #[test]
    fn test_submit_move_needs_evaluation_of_current_position() {
        const HELD: &str = "rnbqkbnr/pppppppp/8/8/8/5N2/PPPPPPPP/RNBQKB1R b KQkq - 1 1";
        const AFTER_D5: &str = "rnbqkbnr/ppp1pppp/8/3p4/8/5N2/PPPPPPPP/RNBQKB1R w KQkq d6 0 2";
        let engine = ScriptedEngine::new()
            .reply(
                crate::STARTING_FEN,
                SearchReply::new()
                    .info(InfoBuilder::new().depth(10).score_cp(30).pv(["e2e4"]).build())
                    .best_move("e2e4"),
            )
            .reply(HELD, SearchReply::new().hold_until_stop())
            .default_reply(
                SearchReply::new()
                    .info(InfoBuilder::new().depth(10).score_cp(20).pv(["c2c4"]).build())
                    .best_move("c2c4"),
            );
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(analyzer.start_with(engine));

        let first = analyzer.set_position(crate::STARTING_FEN).unwrap();
        wait_for_final(&mut analyzer, first);

        // The latest result still belongs to the starting position.
        analyzer.set_position(HELD).unwrap();
        assert_eq!(
            analyzer.submit_move(AFTER_D5, "d7d5", false),
            Err(AnalyzerError::NotEvaluated)
        );

        let third = analyzer.set_position(AFTER_D5).unwrap();
        wait_for_final(&mut analyzer, third);
        let pending = analyzer
            .submit_move(crate::STARTING_FEN, "c2c4", true)
            .unwrap();
        assert_eq!(pending.eval_before, 20);
        assert_eq!(pending.search_id, third + 1);
    }

    #[test]
    fn test_search_ids_continue_after_restart() {
        let engine = || ScriptedEngine::new().default_reply(SearchReply::new().best_move("e2e4"));
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(analyzer.start_with(engine()));
        let first = analyzer.set_position(crate::STARTING_FEN).unwrap();
        wait_for_final(&mut analyzer, first);

        assert!(analyzer.start_with(engine()));
        let second = analyzer.set_position(crate::STARTING_FEN).unwrap();
        assert!(second > first);
        assert_eq!(wait_for_final(&mut analyzer, second).search_id, second);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut analyzer = LiveAnalyzer::new(fast_config());
        assert!(analyzer.start_with(ScriptedEngine::new()));
        analyzer.stop();
        analyzer.stop();
        assert!(!analyzer.is_available());
    }
}
