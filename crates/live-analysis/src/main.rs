//! live-analysis - Analyse positions and classify moves with a UCI engine.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use live_analysis::{AnalyzerConfig, LiveAnalyzer, OpponentPersona, PersonaKind};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "live-analysis")]
#[command(about = "Chess position analysis and move classification with a UCI engine")]
struct Cli {
    /// Configuration file (defaults to analysis.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a position and print the engine's final evaluation
    Analyze {
        /// Position in FEN notation
        fen: String,
        /// Engine executable
        #[arg(long)]
        engine: Option<PathBuf>,
        /// Search depth
        #[arg(short, long)]
        depth: Option<u32>,
        /// Play the position as this opponent persona
        #[arg(long)]
        persona: Option<PersonaKind>,
        /// Give up after this many milliseconds
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify a move from White-relative evaluations before and after it
    Classify {
        /// Evaluation before the move, in centipawns
        #[arg(long, allow_hyphen_values = true)]
        before: i32,
        /// Evaluation after the move, in centipawns
        #[arg(long, allow_hyphen_values = true)]
        after: i32,
        /// The move was played by Black
        #[arg(long)]
        black: bool,
        /// The move, in UCI notation
        #[arg(long = "move", default_value = "0000")]
        mv: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the opponent personas and their engine options
    Personas,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AnalyzerConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AnalyzerConfig::load().context("Failed to load analysis.toml")?,
    };

    match cli.command {
        Commands::Analyze {
            fen,
            engine,
            depth,
            persona,
            timeout_ms,
            json,
        } => {
            let mut config = config;
            if let Some(engine) = engine {
                config.engine_path = engine;
            }
            if let Some(depth) = depth {
                config.depth = depth;
            }
            if let Some(kind) = persona {
                config = config.for_persona(OpponentPersona::get(kind));
            }
            analyze(config, &fen, Duration::from_millis(timeout_ms), json)
        }
        Commands::Classify {
            before,
            after,
            black,
            mv,
            json,
        } => {
            let analyzer = LiveAnalyzer::new(config);
            let classification = analyzer.classify_move(before, after, &mv, !black)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&classification)?);
            } else {
                println!(
                    "{} {} (loss {} cp)",
                    classification.mv, classification.quality, classification.cp_loss
                );
            }
            Ok(())
        }
        Commands::Personas => {
            for persona in OpponentPersona::all() {
                println!(
                    "{:<20} {:<15} elo {:<5} {}ms",
                    persona.name,
                    persona.kind,
                    persona.elo,
                    persona.move_time_ms
                );
                for option in persona.uci_options() {
                    println!("    setoption name {} value {}", option.name, option.value);
                }
            }
            Ok(())
        }
    }
}

fn analyze(config: AnalyzerConfig, fen: &str, timeout: Duration, json: bool) -> anyhow::Result<()> {
    let mut analyzer = LiveAnalyzer::new(config);
    if !analyzer.start() {
        bail!(
            "Engine not available at {}",
            analyzer.config().engine_path.display()
        );
    }
    tracing::info!(
        "Analysing with {}",
        analyzer.engine_name().unwrap_or("unknown engine")
    );

    let search_id = analyzer.set_position(fen)?;
    let deadline = Instant::now() + timeout;
    let mut last_depth = 0;

    let result = loop {
        let latest = analyzer.get_latest();
        if latest.search_id == search_id {
            if latest.is_final {
                break latest;
            }
            if !json && latest.depth > last_depth {
                last_depth = latest.depth;
                eprintln!("{}", latest.summary());
            }
        }
        if !analyzer.is_available() {
            bail!("Engine stopped before finishing the search");
        }
        if Instant::now() >= deadline {
            bail!("No result within {}ms", timeout.as_millis());
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.summary());
    }
    analyzer.stop();
    Ok(())
}
