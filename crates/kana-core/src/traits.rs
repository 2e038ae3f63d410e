//! Trait definitions shared across the conversion pipeline.

/// Fixed symbol ↔ index table.
///
/// Indices are dense over `[0, len())`. The first three entries are the
/// padding, start and end markers.
pub trait SymbolTable: Send + Sync {
    /// Index of a symbol, or `None` if the symbol is not in the table.
    fn index_of(&self, symbol: &str) -> Option<usize>;

    /// Symbol at an index, or `None` outside `[0, len())`.
    fn symbol_of(&self, index: usize) -> Option<&str>;

    /// Number of entries, markers included.
    fn len(&self) -> usize;

    /// Whether the table has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Padding marker index.
    fn pad_id(&self) -> usize {
        0
    }

    /// Start marker index.
    fn start_id(&self) -> usize {
        1
    }

    /// End marker index.
    fn end_id(&self) -> usize {
        2
    }

    /// Whether a symbol may appear in caller input (known and not a marker).
    fn is_input_symbol(&self, symbol: &str) -> bool {
        self.index_of(symbol)
            .is_some_and(|i| i != self.pad_id() && i != self.start_id() && i != self.end_id())
    }
}
