//! Inspect command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use s2s_model::WeightStore;

/// Run the inspect command.
pub fn run(path: &Path) -> Result<()> {
    let store = WeightStore::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    println!("File: {}", path.display());
    println!("Format: {}", store.format());
    println!("Tensors: {} total", store.len());
    println!("Parameters: {}", store.parameter_count());

    let metadata = store.metadata();
    if !metadata.is_empty() {
        println!("\nMetadata:");
        if let Some(table) = &metadata.in_table {
            println!("  in_table: {} entries", table.split('\0').count());
        }
        if let Some(table) = &metadata.out_table {
            println!("  out_table: {} entries", table.split('\0').count());
        }
        if let Some(sos) = metadata.sos_idx {
            println!("  sos_idx: {sos}");
        }
        if let Some(eos) = metadata.eos_idx {
            println!("  eos_idx: {eos}");
        }
    }

    println!("\nTensor details:");
    let infos = store.describe();
    let width = infos.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for info in &infos {
        println!(
            "  {:width$}  {:<5} {:?}",
            info.name,
            info.stored_dtype.as_str(),
            info.shape
        );
    }

    Ok(())
}
