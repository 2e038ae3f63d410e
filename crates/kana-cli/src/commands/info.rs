//! Info command implementation.

use kana_core::SymbolTable;
use kana_vocab::Vocabulary;

/// Run the info command.
pub fn run() {
    println!("Kanalizer");
    println!("=========");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Build info:");
    println!("  Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    println!();
    println!("Symbol tables:");
    for table in [
        Vocabulary::ascii(),
        Vocabulary::phonemes(),
        Vocabulary::kana(),
    ] {
        println!("  {}: {} entries", table.name(), table.len());
    }
    println!();
    println!("Default models:");
    for var in [kanalizer::C2K_MODEL_ENV, kanalizer::P2K_MODEL_ENV] {
        match std::env::var_os(var) {
            Some(path) => println!("  {var}={}", path.to_string_lossy()),
            None => println!("  {var} not set"),
        }
    }
    println!();
    println!("Crates:");
    println!("  kana-core: Shared types, errors and configuration");
    println!("  kana-vocab: Baked symbol tables");
    println!("  s2s-model: Weight loading and sequence model");
    println!("  kanalizer: Conversion facade");
    println!("  kana-cli: This CLI tool");
}
