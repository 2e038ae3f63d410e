//! # kana-vocab
//!
//! Fixed symbol tables shared by training and inference.
//!
//! The three tables are compiled in and must stay identical to the tables the
//! weights were trained with. Each starts with the padding, start and end
//! markers at indices 0, 1 and 2:
//!
//! - [`ASCII_ENTRIES`]: lowercase letters and word punctuation (character mode)
//! - [`EN_PHONES`]: ARPAbet phonemes with stress digits (phoneme mode)
//! - [`KANAS`]: the Katakana block plus the long vowel mark (output side)
//!
//! # Example
//!
//! ```
//! use kana_vocab::Vocabulary;
//! use kana_core::SymbolTable;
//!
//! let kana = Vocabulary::kana();
//! let idx = kana.index_of("コ").unwrap();
//! assert_eq!(kana.symbol_of(idx), Some("コ"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use kana_core::{KanaError, KanaResult, ModelKind, SymbolTable};

/// Padding marker.
pub const PAD: &str = "<pad>";
/// Start-of-sequence marker.
pub const SOS: &str = "<sos>";
/// End-of-sequence marker.
pub const EOS: &str = "<eos>";

/// Padding index.
pub const PAD_IDX: usize = 0;
/// Start marker index.
pub const SOS_IDX: usize = 1;
/// End marker index.
pub const EOS_IDX: usize = 2;

/// Character-mode input table.
pub const ASCII_ENTRIES: &[&str] = &[
    PAD, SOS, EOS, //
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", //
    "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z", //
    " ", "'", "-", ".",
];

/// Phoneme-mode input table.
pub const EN_PHONES: &[&str] = &[
    PAD, SOS, EOS, //
    "AA0", "AA1", "AA2", "AE0", "AE1", "AE2", "AH0", "AH1", "AH2", //
    "AO0", "AO1", "AO2", "AW0", "AW1", "AW2", "AY0", "AY1", "AY2", //
    "B", "CH", "D", "DH", //
    "EH0", "EH1", "EH2", "ER0", "ER1", "ER2", "EY0", "EY1", "EY2", //
    "F", "G", "HH", //
    "IH0", "IH1", "IH2", "IY0", "IY1", "IY2", //
    "JH", "K", "L", "M", "N", "NG", //
    "OW0", "OW1", "OW2", "OY0", "OY1", "OY2", //
    "P", "R", "S", "SH", "T", "TH", //
    "UH0", "UH1", "UH2", "UW0", "UW1", "UW2", //
    "V", "W", "Y", "Z", "ZH",
];

/// Output table.
pub const KANAS: &[&str] = &[
    PAD, SOS, EOS, //
    "ァ", "ア", "ィ", "イ", "ゥ", "ウ", "ェ", "エ", "ォ", "オ", "カ", "ガ", //
    "キ", "ギ", "ク", "グ", "ケ", "ゲ", "コ", "ゴ", "サ", "ザ", "シ", "ジ", //
    "ス", "ズ", "セ", "ゼ", "ソ", "ゾ", "タ", "ダ", "チ", "ヂ", "ッ", "ツ", //
    "ヅ", "テ", "デ", "ト", "ド", "ナ", "ニ", "ヌ", "ネ", "ノ", "ハ", "バ", //
    "パ", "ヒ", "ビ", "ピ", "フ", "ブ", "プ", "ヘ", "ベ", "ペ", "ホ", "ボ", //
    "ポ", "マ", "ミ", "ム", "メ", "モ", "ャ", "ヤ", "ュ", "ユ", "ョ", "ヨ", //
    "ラ", "リ", "ル", "レ", "ロ", "ヮ", "ワ", "ヰ", "ヱ", "ヲ", "ン", "ヴ", //
    "ー",
];

/// Characters accepted by character-mode conversion.
///
/// Every non-marker [`ASCII_ENTRIES`] symbol: the letters `a`-`z` plus space,
/// apostrophe, hyphen and period, which the character model was trained on
/// and `convert_word` passes through without an invalid-input report.
pub static INPUT_CHARS: LazyLock<BTreeSet<char>> = LazyLock::new(|| non_marker_chars(ASCII_ENTRIES));

/// Characters that can appear in a conversion result.
pub static OUTPUT_CHARS: LazyLock<BTreeSet<char>> = LazyLock::new(|| non_marker_chars(KANAS));

fn non_marker_chars(table: &[&str]) -> BTreeSet<char> {
    table
        .iter()
        .skip(EOS_IDX + 1)
        .flat_map(|s| s.chars())
        .collect()
}

static ASCII: LazyLock<Vocabulary> = LazyLock::new(|| Vocabulary::new("ascii", ASCII_ENTRIES));
static PHONEMES: LazyLock<Vocabulary> =
    LazyLock::new(|| Vocabulary::new("phonemes", EN_PHONES));
static KANA: LazyLock<Vocabulary> = LazyLock::new(|| Vocabulary::new("kana", KANAS));

/// Bidirectional symbol ↔ index mapping over a baked table.
#[derive(Debug)]
pub struct Vocabulary {
    name: &'static str,
    symbols: &'static [&'static str],
    index: HashMap<&'static str, usize>,
}

impl Vocabulary {
    fn new(name: &'static str, symbols: &'static [&'static str]) -> Self {
        let index = symbols.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        Self {
            name,
            symbols,
            index,
        }
    }

    /// Character-mode input vocabulary.
    pub fn ascii() -> &'static Vocabulary {
        &ASCII
    }

    /// Phoneme-mode input vocabulary.
    pub fn phonemes() -> &'static Vocabulary {
        &PHONEMES
    }

    /// Output vocabulary.
    pub fn kana() -> &'static Vocabulary {
        &KANA
    }

    /// Input vocabulary consumed by a model direction.
    pub fn input_for(kind: ModelKind) -> &'static Vocabulary {
        match kind {
            ModelKind::C2k => Self::ascii(),
            ModelKind::P2k => Self::phonemes(),
        }
    }

    /// Table name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// All symbols in index order.
    pub fn symbols(&self) -> &'static [&'static str] {
        self.symbols
    }

    /// Check a table that was stored alongside the weights, joined by `sep`.
    pub fn verify_joined(&self, joined: &str, sep: char) -> KanaResult<()> {
        let stored: Vec<&str> = joined.split(sep).collect();
        if stored.len() != self.symbols.len() {
            return Err(KanaError::vocabulary_mismatch(format!(
                "{} table has {} entries, weights were trained with {}",
                self.name,
                self.symbols.len(),
                stored.len()
            )));
        }
        if let Some((i, (ours, theirs))) = self
            .symbols
            .iter()
            .zip(&stored)
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(KanaError::vocabulary_mismatch(format!(
                "{} table differs at index {i}: {ours:?} vs {theirs:?}",
                self.name
            )));
        }
        tracing::debug!(table = self.name, entries = stored.len(), "vocabulary verified");
        Ok(())
    }
}

impl SymbolTable for Vocabulary {
    fn index_of(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    fn symbol_of(&self, index: usize) -> Option<&str> {
        self.symbols.get(index).copied()
    }

    fn len(&self) -> usize {
        self.symbols.len()
    }

    fn pad_id(&self) -> usize {
        PAD_IDX
    }

    fn start_id(&self) -> usize {
        SOS_IDX
    }

    fn end_id(&self) -> usize {
        EOS_IDX
    }
}
