//! Unified error types for the conversion engine.

use std::path::PathBuf;

/// Main error type for kanalizer operations.
#[derive(Debug, thiserror::Error)]
pub enum KanaError {
    /// Model file could not be read.
    #[error("model load failed for {path}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container header or record layout is malformed.
    #[error("invalid weight container: {0}")]
    InvalidContainer(String),

    /// Container format version is not supported.
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    /// Tensor element type tag is not supported.
    #[error("unsupported dtype tag {tag} for tensor {name:?}")]
    UnsupportedDtype { name: String, tag: u8 },

    /// Container ended before a record was complete.
    #[error("weight container truncated while reading {0}")]
    Truncated(String),

    /// A tensor required by the model is absent.
    #[error("missing tensor {0:?}")]
    MissingTensor(String),

    /// A tensor has a different shape than the model expects.
    #[error("shape mismatch for {name:?}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Vocabulary stored with the weights differs from the compiled-in table.
    #[error("vocabulary mismatch: {0}")]
    VocabularyMismatch(String),

    /// Input is empty.
    #[error("input is empty")]
    EmptyInput,

    /// Input contains symbols outside the input alphabet.
    #[error("input contains invalid characters: {chars:?}")]
    InvalidChars { chars: Vec<String> },

    /// Decoding hit the step limit before the end marker.
    #[error("conversion did not finish: {incomplete_output:?}")]
    IncompleteConversion { incomplete_output: String },

    /// Tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with KanaError.
pub type KanaResult<T> = Result<T, KanaError>;

impl KanaError {
    /// Create an invalid container error with message.
    pub fn invalid_container(msg: impl Into<String>) -> Self {
        Self::InvalidContainer(msg.into())
    }

    /// Create a truncation error naming the field being read.
    pub fn truncated(what: impl Into<String>) -> Self {
        Self::Truncated(what.into())
    }

    /// Create a vocabulary mismatch error with message.
    pub fn vocabulary_mismatch(msg: impl Into<String>) -> Self {
        Self::VocabularyMismatch(msg.into())
    }

    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was raised while loading a model.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad { .. }
                | Self::InvalidContainer(_)
                | Self::UnsupportedVersion(_)
                | Self::UnsupportedDtype { .. }
                | Self::Truncated(_)
                | Self::MissingTensor(_)
                | Self::ShapeMismatch { .. }
                | Self::VocabularyMismatch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KanaError::UnsupportedVersion(7);
        assert_eq!(err.to_string(), "unsupported container version 7");

        let err = KanaError::InvalidChars {
            chars: vec!["あ".to_string()],
        };
        assert_eq!(err.to_string(), "input contains invalid characters: [\"あ\"]");
    }

    #[test]
    fn test_error_constructors() {
        let err = KanaError::truncated("tensor name");
        assert!(matches!(err, KanaError::Truncated(_)));
        assert!(err.is_load_error());

        let err = KanaError::config("bad value");
        assert!(matches!(err, KanaError::Config(_)));
        assert!(!err.is_load_error());
    }

    #[test]
    fn test_input_errors_are_not_load_errors() {
        assert!(!KanaError::EmptyInput.is_load_error());
        let err = KanaError::IncompleteConversion {
            incomplete_output: "アア".to_string(),
        };
        assert!(!err.is_load_error());
    }
}
