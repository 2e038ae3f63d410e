//! Convert command implementation.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use kanalizer::{
    Conversion, ConvertOptions, Converter, EngineConfig, ErrorMode, MaxLength, ModelConfig,
    ModelKind, S2sArchitecture, Strategy,
};

/// Options for the convert command.
pub struct ConvertArgs {
    pub input: Vec<String>,
    pub kind: ModelKind,
    pub model: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub normalized: bool,
    pub strategy: Option<Strategy>,
    pub seed: Option<u64>,
    pub max_length: Option<usize>,
    pub on_invalid: Option<ErrorMode>,
    pub on_incomplete: Option<ErrorMode>,
}

/// Run the convert command.
pub fn run(args: ConvertArgs) -> Result<()> {
    let converter = load_converter(&args)?;

    let options = options_for(&args, converter.defaults())?;

    match args.kind {
        ModelKind::C2k => {
            if args.input.is_empty() {
                bail!("no word given");
            }
            for word in &args.input {
                let result = converter
                    .convert_word(word, &options)
                    .with_context(|| format!("failed to convert {word:?}"))?;
                print_result(word, &result);
            }
        }
        ModelKind::P2k => {
            let phonemes: Vec<&str> = args
                .input
                .iter()
                .flat_map(|s| s.split_whitespace())
                .collect();
            let result = converter.convert_phonemes(&phonemes, &options)?;
            print_result(&phonemes.join(" "), &result);
        }
    }

    Ok(())
}

/// Flags given on the command line override the converter's defaults.
fn options_for(args: &ConvertArgs, defaults: &ConvertOptions) -> Result<ConvertOptions> {
    let mut options = defaults.clone();
    if let Some(strategy) = &args.strategy {
        options = options.with_strategy(strategy.clone());
    }
    if let Some(mode) = args.on_invalid {
        options = options.with_on_invalid_input(mode);
    }
    if let Some(mode) = args.on_incomplete {
        options = options.with_on_incomplete(mode);
    }
    if let Some(n) = args.max_length {
        options = options.with_max_length(MaxLength::try_from(n)?);
    }
    if let Some(seed) = args.seed {
        options = options.with_seed(seed);
    }
    Ok(options)
}

fn load_converter(args: &ConvertArgs) -> Result<Arc<Converter>> {
    let architecture = if args.normalized {
        S2sArchitecture::normalized()
    } else {
        S2sArchitecture::default()
    };

    if let Some(path) = &args.model {
        let config = ModelConfig::new(args.kind, path).with_architecture(architecture);
        let converter = Converter::load(&config)
            .with_context(|| format!("failed to load model from {}", path.display()))?;
        return Ok(Arc::new(converter));
    }

    if let Some(path) = &args.config {
        let engine = EngineConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let model = engine
            .model(args.kind)
            .with_context(|| format!("{} has no {} model", path.display(), args.kind))?;
        debug!(path = %model.weights_path.display(), "using model from config");
        let converter = Converter::load(model)?.with_defaults((&engine.defaults).into());
        return Ok(Arc::new(converter));
    }

    kanalizer::default_converter(args.kind).context("no model given; pass --model or --config")
}

fn print_result(input: &str, result: &Conversion) {
    for warning in &result.warnings {
        eprintln!("warning: {input}: {warning}");
    }
    if result.finished {
        println!("{}", result.output);
    } else {
        println!("{} (incomplete)", result.output);
    }
}
