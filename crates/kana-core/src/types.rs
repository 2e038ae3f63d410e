//! Conversion request and result types.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::KanaError;

/// Which input alphabet a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// English spelling → Katakana.
    #[default]
    C2k,
    /// ARPAbet phonemes → Katakana.
    P2k,
}

impl ModelKind {
    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::C2k => "c2k",
            ModelKind::P2k => "p2k",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c2k" | "char" | "chars" => Ok(Self::C2k),
            "p2k" | "phoneme" | "phonemes" => Ok(Self::P2k),
            _ => Err(format!("unknown model kind: {s}")),
        }
    }
}

/// Policy for a recoverable conversion condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Abort with an error.
    #[default]
    Error,
    /// Continue with best effort and report a warning.
    Warning,
    /// Continue with best effort silently.
    Ignore,
}

impl std::str::FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "ignore" | "silent" => Ok(Self::Ignore),
            _ => Err(format!(
                "invalid error mode: {s}, expected one of 'error', 'warning', 'ignore'"
            )),
        }
    }
}

/// Upper bound on decode steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxLength {
    /// Source length plus two.
    #[default]
    Auto,
    /// Fixed number of decode steps.
    Fixed(NonZeroUsize),
}

impl MaxLength {
    /// Resolve to a concrete step count for a source of `source_len` symbols.
    pub fn resolve(self, source_len: usize) -> NonZeroUsize {
        match self {
            MaxLength::Auto => NonZeroUsize::MIN.saturating_add(source_len + 1),
            MaxLength::Fixed(n) => n,
        }
    }
}

impl From<NonZeroUsize> for MaxLength {
    fn from(max_length: NonZeroUsize) -> Self {
        MaxLength::Fixed(max_length)
    }
}

impl TryFrom<usize> for MaxLength {
    type Error = KanaError;

    fn try_from(max_length: usize) -> Result<Self, Self::Error> {
        NonZeroUsize::new(max_length)
            .map(MaxLength::Fixed)
            .ok_or_else(|| KanaError::config("max_length must be a positive integer"))
    }
}

/// Decoding algorithm.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    /// Argmax over the logits.
    #[default]
    Greedy,
    /// Uniform choice among the k best logits.
    TopK(StrategyTopK),
    /// Uniform choice inside the nucleus.
    TopP(StrategyTopP),
}

/// Top-k parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTopK {
    #[serde(default = "default_top_k")]
    pub k: usize,
}

fn default_top_k() -> usize {
    3
}

impl Default for StrategyTopK {
    fn default() -> Self {
        Self { k: default_top_k() }
    }
}

/// Top-p parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTopP {
    /// Cumulative probability threshold.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Softmax temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_top_p() -> f32 {
    0.9
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for StrategyTopP {
    fn default() -> Self {
        Self {
            top_p: default_top_p(),
            temperature: default_temperature(),
        }
    }
}

impl Strategy {
    /// Top-k strategy with the given k.
    pub fn top_k(k: usize) -> Self {
        Self::TopK(StrategyTopK { k })
    }

    /// Top-p strategy with the given threshold and temperature.
    pub fn top_p(top_p: f32, temperature: f32) -> Self {
        Self::TopP(StrategyTopP { top_p, temperature })
    }

    /// Whether the strategy draws random numbers.
    pub fn is_sampling(&self) -> bool {
        !matches!(self, Strategy::Greedy)
    }
}

/// Options for a single conversion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Maximum number of decode steps.
    #[serde(default)]
    pub max_length: MaxLength,
    /// Decoding algorithm.
    #[serde(default)]
    pub strategy: Strategy,
    /// What to do with empty input or unknown symbols.
    #[serde(default)]
    pub on_invalid_input: ErrorMode,
    /// What to do when decoding stops before the end marker.
    #[serde(default)]
    pub on_incomplete: ErrorMode,
    /// Seed for sampling strategies (None = entropy).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            max_length: MaxLength::default(),
            strategy: Strategy::default(),
            on_invalid_input: ErrorMode::Error,
            on_incomplete: ErrorMode::Error,
            seed: None,
        }
    }
}

impl ConvertOptions {
    /// Create options with strict defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum decode length.
    pub fn with_max_length(mut self, max_length: impl Into<MaxLength>) -> Self {
        self.max_length = max_length.into();
        self
    }

    /// Set the decoding strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the invalid-input policy.
    pub fn with_on_invalid_input(mut self, mode: ErrorMode) -> Self {
        self.on_invalid_input = mode;
        self
    }

    /// Set the incomplete-conversion policy.
    pub fn with_on_incomplete(mut self, mode: ErrorMode) -> Self {
        self.on_incomplete = mode;
        self
    }

    /// Set the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Non-fatal condition reported by a conversion in warning mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertWarning {
    /// Input was empty.
    EmptyInput,
    /// Input contained unknown symbols, which were dropped.
    InvalidChars { chars: Vec<String> },
    /// Decoding stopped before the end marker.
    IncompleteConversion { incomplete_output: String },
}

impl std::fmt::Display for ConvertWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertWarning::EmptyInput => write!(f, "input is empty"),
            ConvertWarning::InvalidChars { chars } => {
                write!(f, "input contains invalid characters: {chars:?}")
            }
            ConvertWarning::IncompleteConversion { incomplete_output } => {
                write!(f, "conversion did not finish: {incomplete_output:?}")
            }
        }
    }
}

impl From<ConvertWarning> for KanaError {
    fn from(warning: ConvertWarning) -> Self {
        match warning {
            ConvertWarning::EmptyInput => KanaError::EmptyInput,
            ConvertWarning::InvalidChars { chars } => KanaError::InvalidChars { chars },
            ConvertWarning::IncompleteConversion { incomplete_output } => {
                KanaError::IncompleteConversion { incomplete_output }
            }
        }
    }
}

/// Result of a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversion {
    /// Katakana output, without start or end markers.
    pub output: String,
    /// Warnings raised under `ErrorMode::Warning`.
    pub warnings: Vec<ConvertWarning>,
    /// Whether decoding reached the end marker.
    pub finished: bool,
}

impl Conversion {
    /// Whether any warning was raised.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
