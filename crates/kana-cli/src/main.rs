//! Kanalizer command-line interface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use kanalizer::{ErrorMode, LoggingConfig, ModelKind, Strategy};

mod commands;

/// English to Katakana converter
#[derive(Debug, Parser)]
#[command(name = "kana")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level for the engine crates, or full filter directives
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Log format (json or text)
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ErrorModeArg {
    Error,
    Warning,
    Ignore,
}

impl From<ErrorModeArg> for ErrorMode {
    fn from(arg: ErrorModeArg) -> Self {
        match arg {
            ErrorModeArg::Error => ErrorMode::Error,
            ErrorModeArg::Warning => ErrorMode::Warning,
            ErrorModeArg::Ignore => ErrorMode::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Greedy,
    TopK,
    TopP,
}

/// Decoding flags shared by `convert` and `bench`.
#[derive(Debug, clap::Args)]
struct DecodeArgs {
    /// Decoding strategy [default: greedy]
    #[arg(long)]
    strategy: Option<StrategyArg>,

    /// Candidates kept by top-k
    #[arg(long, default_value = "3")]
    k: usize,

    /// Probability mass kept by top-p
    #[arg(long, default_value = "0.9")]
    top_p: f32,

    /// Softmax temperature for top-p
    #[arg(long, default_value = "1.0")]
    temperature: f32,

    /// Random seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum decode steps (defaults to input length + 2)
    #[arg(long)]
    max_length: Option<usize>,
}

impl DecodeArgs {
    fn strategy(&self) -> Option<Strategy> {
        self.strategy.map(|strategy| match strategy {
            StrategyArg::Greedy => Strategy::Greedy,
            StrategyArg::TopK => Strategy::top_k(self.k),
            StrategyArg::TopP => Strategy::top_p(self.top_p, self.temperature),
        })
    }
}

/// Where to get the model from.
#[derive(Debug, clap::Args)]
struct ModelArgs {
    /// Weight file (E2KM container or safetensors)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Weights use the normalized architecture
    #[arg(long)]
    normalized: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a word (or phonemes) to Katakana
    Convert {
        /// Word, or whitespace-separated ARPAbet phonemes with --phonemes
        input: Vec<String>,

        /// Treat input as phonemes
        #[arg(short, long)]
        phonemes: bool,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        decode: DecodeArgs,

        /// Policy for empty input and unknown symbols [default: error]
        #[arg(long)]
        on_invalid: Option<ErrorModeArg>,

        /// Policy for output that hit the step limit [default: error]
        #[arg(long)]
        on_incomplete: Option<ErrorModeArg>,
    },

    /// List the tensors in a weight file
    Inspect {
        /// Weight file path
        path: PathBuf,
    },

    /// Run local benchmark
    Bench {
        /// Weight file; a random model is used when omitted
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Weights use the normalized architecture
        #[arg(long)]
        normalized: bool,

        /// Hidden width of the random model
        #[arg(long, default_value = "256")]
        dim: usize,

        /// Number of iterations
        #[arg(short, long, default_value = "100")]
        iterations: usize,

        /// Test word
        #[arg(short, long, default_value = "constants")]
        word: String,

        #[command(flatten)]
        decode: DecodeArgs,
    },

    /// Show version and table info
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Json => kanalizer::LogFormat::Json,
        LogFormatArg::Text => kanalizer::LogFormat::Text,
    };
    kanalizer::init_logging(&LoggingConfig {
        level: cli.log_level,
        format,
    });

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kana CLI");

    match cli.command {
        Commands::Convert {
            input,
            phonemes,
            model,
            decode,
            on_invalid,
            on_incomplete,
        } => {
            let options = commands::convert::ConvertArgs {
                input,
                kind: if phonemes {
                    ModelKind::P2k
                } else {
                    ModelKind::C2k
                },
                model: model.model,
                config: model.config,
                normalized: model.normalized,
                strategy: decode.strategy(),
                seed: decode.seed,
                max_length: decode.max_length,
                on_invalid: on_invalid.map(Into::into),
                on_incomplete: on_incomplete.map(Into::into),
            };
            commands::convert::run(options).context("conversion failed")?;
        }
        Commands::Inspect { path } => {
            commands::inspect::run(&path).context("inspection failed")?;
        }
        Commands::Bench {
            model,
            normalized,
            dim,
            iterations,
            word,
            decode,
        } => {
            let options = commands::bench::BenchArgs {
                model,
                normalized,
                dim,
                iterations,
                word,
                strategy: decode.strategy().unwrap_or_default(),
                seed: decode.seed,
                max_length: decode.max_length,
            };
            commands::bench::run(options).context("benchmark failed")?;
        }
        Commands::Info => {
            commands::info::run();
        }
    }

    Ok(())
}
