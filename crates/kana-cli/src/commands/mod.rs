//! CLI command implementations.

pub mod bench;
pub mod convert;
pub mod info;
pub mod inspect;
