//! # kana-core
//!
//! Core types, traits, and error definitions for the kanalizer engine.
//!
//! This crate provides the foundational abstractions used across all other crates
//! in the workspace, including:
//!
//! - Conversion request and result types (`ConvertOptions`, `Conversion`, etc.)
//! - The `SymbolTable` trait implemented by the vocabulary tables
//! - Unified error handling via `KanaError`
//! - Configuration structures

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    AttentionScale, ComputeDType, ConvertDefaults, EngineConfig, LogFormat, LoggingConfig,
    ModelConfig, S2sArchitecture,
};
pub use error::{KanaError, KanaResult};
pub use traits::SymbolTable;
pub use types::{
    Conversion, ConvertOptions, ConvertWarning, ErrorMode, MaxLength, ModelKind, Strategy,
    StrategyTopK, StrategyTopP,
};
