//! Live chess position analysis with a UCI engine.
//!
//! This crate keeps an external engine such as Stockfish analysing the current
//! position of a game in the background, and classifies the moves played
//! against its evaluations. The game loop never blocks on the engine.
//!
//! # Overview
//!
//! - [`LiveAnalyzer`] - Owns the engine and its worker thread; `set_position` / `get_latest`
//! - [`AnalysisResult`] - One snapshot of engine output, scored from White's side
//! - [`classify_move`] / [`MoveQuality`] - Move quality from the evaluation lost
//! - [`EngineProcess`] / [`EngineConnection`] - The engine process and the seam tests replace
//! - [`AnalyzerConfig`] - Settings, loaded from `analysis.toml`
//!
//! # Example
//!
//! ```ignore
//! use live_analysis::{AnalyzerConfig, LiveAnalyzer};
//!
//! let mut analyzer = LiveAnalyzer::new(AnalyzerConfig::load()?);
//! if analyzer.start() {
//!     analyzer.set_position("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1")?;
//! }
//! // Every frame:
//! let latest = analyzer.get_latest();
//! println!("{}", latest.summary());
//! ```

pub mod analysis;
pub mod analyzer;
pub mod channel;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod parser;
pub mod persona;
pub mod position;
pub mod quality;
pub mod stub;
mod worker;

pub use analysis::{AnalysisResult, SearchId};
pub use analyzer::{AnalyzerError, LiveAnalyzer, PendingMove};
pub use channel::{result_channel, LatestResult, ResultSender};
pub use config::{AnalyzerConfig, ConfigError, EvalAfterMode};
pub use engine::{handshake, EngineConnection, EngineError, EngineOption, EngineProcess};
pub use evaluation::{Evaluation, MATE_SCORE_CP};
pub use parser::{parse_bestmove_line, parse_info_line, BestMove};
pub use persona::{OpponentPersona, PersonaKind};
pub use position::{is_uci_move, Position, PositionError, Side, STARTING_FEN};
pub use quality::{
    classify_move, ClassificationTally, ClassifyError, MoveClassification, MoveQuality,
    QualityThresholds,
};
