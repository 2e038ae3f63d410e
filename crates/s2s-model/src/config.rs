//! Sequence model configuration.

use kana_core::{KanaError, KanaResult, S2sArchitecture};
use serde::{Deserialize, Serialize};

/// Sizes and layout of one encoder–decoder model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S2sConfig {
    /// Input table size (rows of `e_emb.weight`).
    pub input_vocab_size: usize,
    /// Output table size (rows of `k_emb.weight` and `fc.weight`).
    pub output_vocab_size: usize,
    /// Hidden width; inferred from `e_emb.weight` when absent.
    #[serde(default)]
    pub dim: Option<usize>,
    /// Start marker index in the output table.
    #[serde(default = "default_start_id")]
    pub start_id: usize,
    /// End marker index in the output table.
    #[serde(default = "default_end_id")]
    pub end_id: usize,
    #[serde(default)]
    pub architecture: S2sArchitecture,
}

fn default_start_id() -> usize {
    1
}

fn default_end_id() -> usize {
    2
}

impl S2sConfig {
    pub fn new(input_vocab_size: usize, output_vocab_size: usize) -> Self {
        Self {
            input_vocab_size,
            output_vocab_size,
            dim: None,
            start_id: default_start_id(),
            end_id: default_end_id(),
            architecture: S2sArchitecture::default(),
        }
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn with_architecture(mut self, architecture: S2sArchitecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Check sizes against each other.
    pub fn validate(&self) -> KanaResult<()> {
        self.architecture.validate()?;
        for (what, id) in [("start", self.start_id), ("end", self.end_id)] {
            if id >= self.output_vocab_size {
                return Err(KanaError::config(format!(
                    "{what} marker {id} outside output table of {}",
                    self.output_vocab_size
                )));
            }
        }
        if let Some(dim) = self.dim {
            if dim == 0 || dim % self.architecture.num_heads != 0 {
                return Err(KanaError::config(format!(
                    "dim {dim} must be a positive multiple of {} heads",
                    self.architecture.num_heads
                )));
            }
        }
        Ok(())
    }
}
