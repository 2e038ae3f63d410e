//! Benchmark command implementation.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use kana_vocab::{ASCII_ENTRIES, KANAS};
use kanalizer::{
    ConvertOptions, Converter, ErrorMode, MaxLength, ModelConfig, ModelKind, S2sArchitecture,
    Strategy,
};
use s2s_model::SyntheticWeights;

/// Options for the bench command.
pub struct BenchArgs {
    pub model: Option<PathBuf>,
    pub normalized: bool,
    pub dim: usize,
    pub iterations: usize,
    pub word: String,
    pub strategy: Strategy,
    pub seed: Option<u64>,
    pub max_length: Option<usize>,
}

/// Run the benchmark command.
pub fn run(args: BenchArgs) -> Result<()> {
    if args.iterations == 0 {
        bail!("iterations must be positive");
    }
    let architecture = if args.normalized {
        S2sArchitecture::normalized()
    } else {
        S2sArchitecture::default()
    };

    let load_start = Instant::now();
    let converter = match &args.model {
        Some(path) => {
            let config = ModelConfig::new(ModelKind::C2k, path).with_architecture(architecture);
            Converter::load(&config)
                .with_context(|| format!("failed to load model from {}", path.display()))?
        }
        None => {
            let bytes = SyntheticWeights::new(ASCII_ENTRIES.len(), KANAS.len(), args.dim)
                .with_layer_norm(args.normalized)
                .to_bytes()?;
            Converter::from_bytes(ModelKind::C2k, &bytes, architecture)?
        }
    };
    let load_ms = load_start.elapsed().as_secs_f64() * 1000.0;

    let mut options = ConvertOptions::default()
        .with_strategy(args.strategy)
        .with_on_incomplete(ErrorMode::Ignore);
    if let Some(n) = args.max_length {
        options = options.with_max_length(MaxLength::try_from(n)?);
    }
    if let Some(seed) = args.seed {
        options = options.with_seed(seed);
    }

    println!("Running benchmark with {} iterations", args.iterations);
    match &args.model {
        Some(path) => println!("Model: {}", path.display()),
        None => println!("Model: random (dim {})", args.dim),
    }
    println!("Word: \"{}\"", args.word);
    println!("Load: {load_ms:.3} ms");
    println!();

    let mut output = String::new();
    let mut times = Vec::with_capacity(args.iterations);
    for _ in 0..args.iterations {
        let start = Instant::now();
        output = converter.convert_word(&args.word, &options)?.output;
        times.push(start.elapsed().as_secs_f64() * 1000.0);
    }

    let avg = times.iter().sum::<f64>() / times.len() as f64;
    println!("Conversion:");
    println!("  Output: {output}");
    println!("  Avg: {avg:.3} ms");
    println!("  P50: {:.3} ms", percentile(&times, 50));
    println!("  P95: {:.3} ms", percentile(&times, 95));
    println!();

    info!(iterations = args.iterations, avg_ms = avg, "Benchmark complete");
    Ok(())
}

/// Calculate the p-th percentile of a slice.
fn percentile(values: &[f64], p: usize) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
