//! # s2s-model
//!
//! Encoder–decoder inference for English → Katakana conversion.
//!
//! This crate provides everything between a weight file and a sequence of
//! output indices:
//! - The E2KM weight container codec and a safetensors fallback
//! - GRU, multi-head attention and the other layers, written against candle tensors
//! - The sequence model with greedy, top-k and top-p decoding
//!
//! # Architecture
//!
//! - Input embedding
//! - Bidirectional GRU encoder, projected back to the model width
//! - Per step:
//!   - Output embedding of the previous symbol
//!   - Pre-decoder GRU
//!   - Attention over the encoder states
//!   - Post-decoder GRU over `[decoder, attention]`
//!   - Projection to the output table
//!
//! # Example
//!
//! ```ignore
//! use s2s_model::{S2sConfig, S2sModel, SamplerRng};
//! use kana_core::Strategy;
//! use std::num::NonZeroUsize;
//!
//! let model = S2sModel::load("c2k.e2km", S2sConfig::new(33, 88))?;
//! let out = model.infer(&[5, 17, 16], NonZeroUsize::new(10).unwrap(), &Strategy::Greedy, &mut SamplerRng::for_strategy(&Strategy::Greedy, None))?;
//! println!("tokens: {:?}", out.tokens);
//! ```

pub mod config;
pub mod container;
pub mod layers;
pub mod model;
pub mod sampling;
pub mod synthetic;
pub mod weights;

// Re-exports for convenience
pub use config::S2sConfig;
pub use container::{Container, ContainerBuilder, ElementType, RawTensor};
pub use layers::{Embedding, Gru, GruCell, LayerNorm, Linear, MultiHeadAttention};
pub use model::{required_tensors, S2sModel, S2sOutput};
pub use sampling::SamplerRng;
pub use synthetic::SyntheticWeights;
pub use weights::{TensorInfo, WeightFormat, WeightMetadata, WeightStore};
