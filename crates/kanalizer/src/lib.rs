//! # kanalizer
//!
//! English words and ARPAbet phonemes to Katakana.
//!
//! A [`Converter`] pairs a loaded sequence model with its input vocabulary
//! and applies the invalid-input and incomplete-output policies of
//! [`ConvertOptions`].
//!
//! ## Example
//!
//! ```ignore
//! use kanalizer::{ConvertOptions, Converter, ModelConfig, ModelKind};
//!
//! let converter = Converter::load(&ModelConfig::new(ModelKind::C2k, "c2k.e2km"))?;
//! let result = converter.convert_word("constants", &ConvertOptions::default())?;
//! assert_eq!(result.output, "コンスタンツ");
//! ```
//!
//! The process-wide default converters are built lazily from
//! `KANA_C2K_MODEL` / `KANA_P2K_MODEL`, or installed explicitly:
//!
//! ```ignore
//! kanalizer::install_default(converter)?;
//! let kana = kanalizer::convert("constants").perform()?;
//! ```

pub mod converter;
pub mod logging;
pub mod metrics;

use std::env;
use std::sync::{Arc, OnceLock};

pub use converter::Converter;
pub use kana_core::{
    Conversion, ConvertOptions, ConvertWarning, EngineConfig, ErrorMode, KanaError, KanaResult,
    LogFormat, LoggingConfig, MaxLength, ModelConfig, ModelKind, S2sArchitecture, Strategy,
    StrategyTopK, StrategyTopP,
};
pub use logging::init_logging;

/// Weight file for the default character model.
pub const C2K_MODEL_ENV: &str = "KANA_C2K_MODEL";
/// Weight file for the default phoneme model.
pub const P2K_MODEL_ENV: &str = "KANA_P2K_MODEL";
/// Set to `1` when the default weights use the normalized architecture.
pub const LAYER_NORM_ENV: &str = "KANA_LAYER_NORM";

static DEFAULT_C2K: OnceLock<Arc<Converter>> = OnceLock::new();
static DEFAULT_P2K: OnceLock<Arc<Converter>> = OnceLock::new();

fn slot(kind: ModelKind) -> &'static OnceLock<Arc<Converter>> {
    match kind {
        ModelKind::C2k => &DEFAULT_C2K,
        ModelKind::P2k => &DEFAULT_P2K,
    }
}

/// Install `converter` as the process-wide default for its kind.
///
/// Fails if a default of that kind was already installed or built.
pub fn install_default(converter: Converter) -> KanaResult<()> {
    let kind = converter.kind();
    slot(kind)
        .set(Arc::new(converter))
        .map_err(|_| KanaError::config(format!("default {kind} converter already initialized")))
}

/// The process-wide default converter for `kind`, loading it on first use.
pub fn default_converter(kind: ModelKind) -> KanaResult<Arc<Converter>> {
    let cell = slot(kind);
    if let Some(converter) = cell.get() {
        return Ok(Arc::clone(converter));
    }

    let converter = Arc::new(Converter::load(&default_model_config(kind)?)?);
    // Another thread may have won the race; theirs is kept.
    let _ = cell.set(Arc::clone(&converter));
    Ok(cell.get().map(Arc::clone).unwrap_or(converter))
}

fn default_model_config(kind: ModelKind) -> KanaResult<ModelConfig> {
    let var = match kind {
        ModelKind::C2k => C2K_MODEL_ENV,
        ModelKind::P2k => P2K_MODEL_ENV,
    };
    let path = env::var_os(var).ok_or_else(|| {
        KanaError::config(format!(
            "no default {kind} model: set {var} or call install_default"
        ))
    })?;

    let architecture = match env::var(LAYER_NORM_ENV).as_deref() {
        Ok("1") | Ok("true") => S2sArchitecture::normalized(),
        _ => S2sArchitecture::default(),
    };
    Ok(ModelConfig::new(kind, path).with_architecture(architecture))
}

/// Convert an English word with the default character model.
pub fn convert(word: impl Into<String>) -> ConvertBuilder {
    ConvertBuilder::new(word.into())
}

/// Options for a single [`convert`] call.
#[derive(Debug, Clone)]
#[must_use = "call perform() to run the conversion"]
pub struct ConvertBuilder {
    word: String,
    kind: ModelKind,
    options: ConvertOptions,
}

impl ConvertBuilder {
    fn new(word: String) -> Self {
        Self {
            word,
            kind: ModelKind::C2k,
            options: ConvertOptions::default(),
        }
    }

    /// Read the word as whitespace-separated phonemes.
    pub fn phonemes(mut self) -> Self {
        self.kind = ModelKind::P2k;
        self
    }

    pub fn with_max_length(mut self, max_length: impl Into<MaxLength>) -> Self {
        self.options = self.options.with_max_length(max_length);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.options = self.options.with_strategy(strategy);
        self
    }

    pub fn with_on_invalid_input(mut self, mode: ErrorMode) -> Self {
        self.options = self.options.with_on_invalid_input(mode);
        self
    }

    pub fn with_on_incomplete(mut self, mode: ErrorMode) -> Self {
        self.options = self.options.with_on_incomplete(mode);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options = self.options.with_seed(seed);
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Run on the default converter and return only the Katakana.
    pub fn perform(self) -> KanaResult<String> {
        Ok(self.perform_detailed()?.output)
    }

    /// Run on the default converter, keeping warnings and completion state.
    pub fn perform_detailed(self) -> KanaResult<Conversion> {
        let converter = default_converter(self.kind)?;
        converter.convert_word(&self.word, &self.options)
    }

    /// Run on an explicit converter.
    pub fn perform_with(self, converter: &Converter) -> KanaResult<Conversion> {
        converter.convert_word(&self.word, &self.options)
    }
}
