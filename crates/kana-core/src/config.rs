//! Configuration structures for the conversion engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KanaError, KanaResult};
use crate::types::{ConvertOptions, ErrorMode, MaxLength, ModelKind, Strategy};

/// Model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which input alphabet the model consumes.
    #[serde(default)]
    pub kind: ModelKind,

    /// Path to model weights (E2KM container or safetensors).
    pub weights_path: PathBuf,

    /// Network layout settings.
    #[serde(default)]
    pub architecture: S2sArchitecture,
}

impl ModelConfig {
    /// Configuration for the plain architecture.
    pub fn new(kind: ModelKind, weights_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            weights_path: weights_path.into(),
            architecture: S2sArchitecture::default(),
        }
    }

    /// Replace the architecture settings.
    pub fn with_architecture(mut self, architecture: S2sArchitecture) -> Self {
        self.architecture = architecture;
        self
    }
}

/// Encoder–decoder layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S2sArchitecture {
    /// Number of attention heads.
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    /// Attention score divisor.
    #[serde(default)]
    pub attention_scale: AttentionScale,
    /// Apply layer norms after the encoder, pre-decoder, attention and post-decoder.
    #[serde(default)]
    pub layer_norm: bool,
    /// Forbid the end marker on the first decode step.
    #[serde(default)]
    pub suppress_eos_on_first_step: bool,
    /// Compute precision.
    #[serde(default)]
    pub dtype: ComputeDType,
}

fn default_num_heads() -> usize {
    4
}

impl Default for S2sArchitecture {
    fn default() -> Self {
        Self {
            num_heads: default_num_heads(),
            attention_scale: AttentionScale::default(),
            layer_norm: false,
            suppress_eos_on_first_step: false,
            dtype: ComputeDType::default(),
        }
    }
}

impl S2sArchitecture {
    /// Layout of checkpoints trained with layer norms and standard attention scaling.
    pub fn normalized() -> Self {
        Self {
            num_heads: default_num_heads(),
            attention_scale: AttentionScale::HeadDim,
            layer_norm: true,
            suppress_eos_on_first_step: true,
            dtype: ComputeDType::default(),
        }
    }

    /// Check values that cannot be validated by the type system.
    pub fn validate(&self) -> KanaResult<()> {
        if self.num_heads == 0 {
            return Err(KanaError::config("num_heads must be positive"));
        }
        Ok(())
    }
}

/// Divisor applied to attention scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionScale {
    /// √(full model dimension).
    #[default]
    ModelDim,
    /// √(per-head dimension).
    HeadDim,
}

impl AttentionScale {
    /// Divisor for a model of width `dim` split into `num_heads` heads.
    pub fn divisor(self, dim: usize, num_heads: usize) -> f64 {
        match self {
            AttentionScale::ModelDim => (dim as f64).sqrt(),
            AttentionScale::HeadDim => ((dim / num_heads.max(1)) as f64).sqrt(),
        }
    }
}

/// Floating point precision used for inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDType {
    /// f64 when every stored float tensor is f64, f32 otherwise.
    #[default]
    Auto,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
}

impl ComputeDType {
    /// Pick the compute dtype for weights stored with the given element types.
    ///
    /// Integer types are ignored; half precision counts as f32.
    pub fn resolve<I>(self, stored: I) -> candle_core::DType
    where
        I: IntoIterator<Item = candle_core::DType>,
    {
        use candle_core::DType;
        match self {
            ComputeDType::F32 => DType::F32,
            ComputeDType::F64 => DType::F64,
            ComputeDType::Auto => {
                let mut floats = stored.into_iter().filter(|d| d.is_float()).peekable();
                if floats.peek().is_some() && floats.all(|d| d == DType::F64) {
                    DType::F64
                } else {
                    DType::F32
                }
            }
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for the engine's own crates, or a full filter directive list.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Default conversion options applied when a caller does not pass its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertDefaults {
    #[serde(default)]
    pub max_length: MaxLength,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub on_invalid_input: ErrorMode,
    #[serde(default)]
    pub on_incomplete: ErrorMode,
}

impl From<&ConvertDefaults> for ConvertOptions {
    fn from(defaults: &ConvertDefaults) -> Self {
        ConvertOptions::new()
            .with_max_length(defaults.max_length)
            .with_strategy(defaults.strategy.clone())
            .with_on_invalid_input(defaults.on_invalid_input)
            .with_on_incomplete(defaults.on_incomplete)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Character-to-kana model.
    #[serde(default)]
    pub c2k: Option<ModelConfig>,
    /// Phoneme-to-kana model.
    #[serde(default)]
    pub p2k: Option<ModelConfig>,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Conversion defaults.
    #[serde(default)]
    pub defaults: ConvertDefaults,
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> KanaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(text: &str) -> KanaResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| KanaError::config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Model configuration for a direction, if configured.
    pub fn model(&self, kind: ModelKind) -> Option<&ModelConfig> {
        match kind {
            ModelKind::C2k => self.c2k.as_ref(),
            ModelKind::P2k => self.p2k.as_ref(),
        }
    }

    fn validate(&self) -> KanaResult<()> {
        for (slot, model) in [(ModelKind::C2k, &self.c2k), (ModelKind::P2k, &self.p2k)] {
            if let Some(model) = model {
                if model.kind != slot {
                    return Err(KanaError::config(format!(
                        "model configured under {slot} declares kind {}",
                        model.kind
                    )));
                }
                model.architecture.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_architecture_defaults() {
        let arch = S2sArchitecture::default();
        assert_eq!(arch.num_heads, 4);
        assert_eq!(arch.attention_scale, AttentionScale::ModelDim);
        assert!(!arch.layer_norm);
        assert!(!arch.suppress_eos_on_first_step);

        let norm = S2sArchitecture::normalized();
        assert!(norm.layer_norm);
        assert!(norm.suppress_eos_on_first_step);
        assert_eq!(norm.attention_scale, AttentionScale::HeadDim);
    }

    #[test]
    fn test_attention_scale_divisor() {
        assert!((AttentionScale::ModelDim.divisor(16, 4) - 4.0).abs() < 1e-12);
        assert!((AttentionScale::HeadDim.divisor(16, 4) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_dtype_follows_stored_weights() {
        use candle_core::DType;

        let auto = ComputeDType::Auto;
        assert_eq!(auto.resolve([DType::F64, DType::F64, DType::I64]), DType::F64);
        assert_eq!(auto.resolve([DType::F64, DType::F32]), DType::F32);
        assert_eq!(auto.resolve([DType::F16, DType::BF16]), DType::F32);
        assert_eq!(auto.resolve([DType::I64]), DType::F32);
        assert_eq!(auto.resolve(Vec::<DType>::new()), DType::F32);

        assert_eq!(ComputeDType::F32.resolve([DType::F64]), DType::F32);
        assert_eq!(ComputeDType::F64.resolve([DType::F32]), DType::F64);
        assert_eq!(S2sArchitecture::default().dtype, ComputeDType::Auto);
    }

    #[test]
    fn test_engine_config_from_json() {
        let json = r#"{
            "c2k": { "kind": "c2k", "weights_path": "models/c2k.bin" },
            "p2k": {
                "kind": "p2k",
                "weights_path": "models/p2k.safetensors",
                "architecture": { "layer_norm": true, "attention_scale": "head_dim" }
            },
            "defaults": { "on_incomplete": "warning" }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();

        let c2k = config.model(ModelKind::C2k).unwrap();
        assert_eq!(c2k.weights_path, PathBuf::from("models/c2k.bin"));
        assert_eq!(c2k.architecture, S2sArchitecture::default());

        let p2k = config.model(ModelKind::P2k).unwrap();
        assert!(p2k.architecture.layer_norm);
        assert_eq!(p2k.architecture.num_heads, 4);

        let opts = ConvertOptions::from(&config.defaults);
        assert_eq!(opts.on_incomplete, ErrorMode::Warning);
        assert_eq!(opts.on_invalid_input, ErrorMode::Error);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_engine_config_rejects_kind_mismatch() {
        let json = r#"{ "c2k": { "kind": "p2k", "weights_path": "x" } }"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(KanaError::Config(_))
        ));
    }

    #[test]
    fn test_engine_config_rejects_zero_heads() {
        let json = r#"{ "c2k": { "weights_path": "x", "architecture": { "num_heads": 0 } } }"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_engine_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "logging": {{ "level": "debug", "format": "json" }} }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(config.c2k.is_none());
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_engine_config_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/kana.json").unwrap_err();
        assert!(matches!(err, KanaError::Io(_)));
    }
}
