//! Conversion facade: vocabulary mapping, input policy and output policy.

use std::sync::Arc;
use std::time::Instant;

use kana_core::{
    Conversion, ConvertOptions, ConvertWarning, ErrorMode, KanaError, KanaResult, ModelConfig,
    ModelKind, S2sArchitecture, SymbolTable,
};
use kana_vocab::{Vocabulary, EOS_IDX, SOS_IDX};
use s2s_model::{S2sConfig, S2sModel, SamplerRng, WeightMetadata, WeightStore};
use tracing::{debug, info, instrument, warn};

use crate::metrics::ConversionMetrics;

/// Converts input symbols of one alphabet to Katakana.
///
/// Immutable after construction; share across threads with `Arc`.
#[derive(Debug, Clone)]
pub struct Converter {
    kind: ModelKind,
    model: Arc<S2sModel>,
    input: &'static Vocabulary,
    output: &'static Vocabulary,
    defaults: ConvertOptions,
    metrics: ConversionMetrics,
}

impl Converter {
    /// Load the model described by `config`.
    #[instrument(skip(config), fields(kind = %config.kind, path = %config.weights_path.display()))]
    pub fn load(config: &ModelConfig) -> KanaResult<Self> {
        let store = WeightStore::load(&config.weights_path)?;
        Self::from_store(config.kind, &store, config.architecture.clone())
    }

    /// Build from an in-memory weight file.
    pub fn from_bytes(
        kind: ModelKind,
        bytes: &[u8],
        architecture: S2sArchitecture,
    ) -> KanaResult<Self> {
        let store = WeightStore::from_bytes(bytes)?;
        Self::from_store(kind, &store, architecture)
    }

    /// Build from loaded weights, checking any stored vocabulary against the baked tables.
    pub fn from_store(
        kind: ModelKind,
        store: &WeightStore,
        architecture: S2sArchitecture,
    ) -> KanaResult<Self> {
        let input = Vocabulary::input_for(kind);
        let output = Vocabulary::kana();
        verify_metadata(store.metadata(), input, output)?;

        let config = S2sConfig::new(input.len(), output.len()).with_architecture(architecture);
        let model = S2sModel::new(store, config)?;
        info!(kind = %kind, format = %store.format(), "Converter ready");

        Ok(Self {
            kind,
            model: Arc::new(model),
            input,
            output,
            defaults: ConvertOptions::default(),
            metrics: ConversionMetrics::new(),
        })
    }

    /// Replace the options used by the `*_default` entry points.
    pub fn with_defaults(mut self, defaults: ConvertOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn model(&self) -> &S2sModel {
        &self.model
    }

    pub fn defaults(&self) -> &ConvertOptions {
        &self.defaults
    }

    /// Input table of this converter.
    pub fn input_vocabulary(&self) -> &'static Vocabulary {
        self.input
    }

    /// Convert a word.
    ///
    /// Character models read one symbol per character; phoneme models read
    /// whitespace-separated phoneme codes.
    pub fn convert_word(&self, word: &str, options: &ConvertOptions) -> KanaResult<Conversion> {
        match self.kind {
            ModelKind::C2k => {
                let symbols: Vec<String> = word.chars().map(String::from).collect();
                self.convert(&symbols, options)
            }
            ModelKind::P2k => {
                let symbols: Vec<&str> = word.split_whitespace().collect();
                self.convert(&symbols, options)
            }
        }
    }

    /// Convert a phoneme sequence.
    pub fn convert_phonemes<S: AsRef<str>>(
        &self,
        phonemes: &[S],
        options: &ConvertOptions,
    ) -> KanaResult<Conversion> {
        self.convert(phonemes, options)
    }

    /// [`convert_word`](Self::convert_word) with this converter's defaults.
    pub fn convert_word_default(&self, word: &str) -> KanaResult<Conversion> {
        self.convert_word(word, &self.defaults)
    }

    /// Convert a sequence of input symbols.
    #[instrument(skip(self, symbols, options), fields(kind = %self.kind, len = symbols.len()))]
    pub fn convert<S: AsRef<str>>(
        &self,
        symbols: &[S],
        options: &ConvertOptions,
    ) -> KanaResult<Conversion> {
        let started = Instant::now();
        let kind = self.kind.as_str();
        self.metrics.conversion_started(kind);

        let result = self.run(symbols, options);

        match &result {
            Ok(conversion) => {
                if !conversion.finished {
                    self.metrics.conversion_incomplete(kind);
                }
            }
            Err(KanaError::IncompleteConversion { .. }) => {
                self.metrics.conversion_incomplete(kind);
                self.metrics.conversion_failed(kind);
            }
            Err(_) => self.metrics.conversion_failed(kind),
        }
        self.metrics
            .record_latency(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn run<S: AsRef<str>>(&self, symbols: &[S], options: &ConvertOptions) -> KanaResult<Conversion> {
        let mut warnings = Vec::new();

        if symbols.is_empty() {
            apply_policy(options.on_invalid_input, ConvertWarning::EmptyInput, &mut warnings)?;
            return Ok(Conversion {
                output: String::new(),
                warnings,
                finished: true,
            });
        }

        let mut source = Vec::with_capacity(symbols.len());
        let mut invalid = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref();
            match self.input.index_of(symbol) {
                Some(i) if self.input.is_input_symbol(symbol) => source.push(i),
                _ => invalid.push(symbol.to_string()),
            }
        }
        if !invalid.is_empty() {
            apply_policy(
                options.on_invalid_input,
                ConvertWarning::InvalidChars { chars: invalid },
                &mut warnings,
            )?;
        }
        if source.is_empty() {
            return Ok(Conversion {
                output: String::new(),
                warnings,
                finished: true,
            });
        }

        let max_steps = options.max_length.resolve(source.len());
        let mut rng = SamplerRng::for_strategy(&options.strategy, options.seed);
        let raw = self
            .model
            .infer(&source, max_steps, &options.strategy, &mut rng)?;
        self.metrics.record_decode_steps(raw.tokens.len() - 1);

        let output: String = raw
            .body()
            .iter()
            .filter(|&&i| i > EOS_IDX)
            .filter_map(|&i| self.output.symbol_of(i))
            .collect();
        debug!(%output, finished = raw.finished, "converted");

        if !raw.finished {
            apply_policy(
                options.on_incomplete,
                ConvertWarning::IncompleteConversion {
                    incomplete_output: output.clone(),
                },
                &mut warnings,
            )?;
        }

        Ok(Conversion {
            output,
            warnings,
            finished: raw.finished,
        })
    }
}

/// Raise, record or drop a condition according to `mode`.
fn apply_policy(
    mode: ErrorMode,
    condition: ConvertWarning,
    warnings: &mut Vec<ConvertWarning>,
) -> KanaResult<()> {
    match mode {
        ErrorMode::Error => Err(condition.into()),
        ErrorMode::Warning => {
            warn!("{condition}");
            warnings.push(condition);
            Ok(())
        }
        ErrorMode::Ignore => Ok(()),
    }
}

fn verify_metadata(
    metadata: &WeightMetadata,
    input: &Vocabulary,
    output: &Vocabulary,
) -> KanaResult<()> {
    if let Some(table) = &metadata.in_table {
        input.verify_joined(table, '\0')?;
    }
    if let Some(table) = &metadata.out_table {
        output.verify_joined(table, '\0')?;
    }
    for (what, stored, baked) in [
        ("sos_idx", metadata.sos_idx, SOS_IDX),
        ("eos_idx", metadata.eos_idx, EOS_IDX),
    ] {
        if let Some(stored) = stored {
            if stored != baked {
                return Err(KanaError::vocabulary_mismatch(format!(
                    "{what} is {stored} in the weights, {baked} in the tables"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kana_core::MaxLength;
    use kana_vocab::KANAS;
    use s2s_model::SyntheticWeights;

    const DIM: usize = 8;

    fn kana_index(symbol: &str) -> usize {
        Vocabulary::kana().index_of(symbol).unwrap()
    }

    /// A converter whose every step produces the same logits.
    fn fixed_converter(kind: ModelKind, bias: Vec<f32>) -> Converter {
        let input = Vocabulary::input_for(kind).len();
        let bytes = SyntheticWeights::new(input, KANAS.len(), DIM)
            .with_tensor("fc.weight", vec![0.0; KANAS.len() * DIM])
            .with_tensor("fc.bias", bias)
            .to_bytes()
            .unwrap();
        Converter::from_bytes(kind, &bytes, S2sArchitecture::default()).unwrap()
    }

    fn bias(first: usize, second: usize) -> Vec<f32> {
        let mut bias = vec![0.0; KANAS.len()];
        bias[first] = 2.0;
        bias[second] = 1.0;
        bias
    }

    /// Emits ア until the step limit.
    fn looping() -> Converter {
        fixed_converter(ModelKind::C2k, bias(kana_index("ア"), EOS_IDX))
    }

    /// Emits END immediately.
    fn stopping() -> Converter {
        fixed_converter(ModelKind::C2k, bias(EOS_IDX, kana_index("ア")))
    }

    #[test]
    fn test_empty_input_policies() {
        let conv = stopping();
        let err = conv.convert_word("", &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, KanaError::EmptyInput));

        let warn = ConvertOptions::default().with_on_invalid_input(ErrorMode::Warning);
        let result = conv.convert_word("", &warn).unwrap();
        assert_eq!(result.output, "");
        assert_eq!(result.warnings, vec![ConvertWarning::EmptyInput]);

        let ignore = ConvertOptions::default().with_on_invalid_input(ErrorMode::Ignore);
        let result = conv.convert_word("", &ignore).unwrap();
        assert!(result.warnings.is_empty());
        assert!(result.finished);
    }

    #[test]
    fn test_invalid_chars_reported_in_order() {
        let conv = stopping();
        for word in ["あ", "A"] {
            match conv.convert_word(word, &ConvertOptions::default()) {
                Err(KanaError::InvalidChars { chars }) => assert_eq!(chars, vec![word]),
                other => panic!("expected invalid chars for {word}, got {other:?}"),
            }
        }

        match conv.convert_word("aBcD", &ConvertOptions::default()) {
            Err(KanaError::InvalidChars { chars }) => assert_eq!(chars, vec!["B", "D"]),
            other => panic!("expected invalid chars, got {other:?}"),
        }
    }

    #[test]
    fn test_markers_are_invalid_input() {
        let conv = stopping();
        let err = conv
            .convert(&["a", "<eos>"], &ConvertOptions::default())
            .unwrap_err();
        assert!(matches!(err, KanaError::InvalidChars { chars } if chars == vec!["<eos>"]));
    }

    #[test]
    fn test_invalid_chars_dropped_in_warning_mode() {
        let conv = looping();
        let warn = ConvertOptions::default()
            .with_on_invalid_input(ErrorMode::Warning)
            .with_on_incomplete(ErrorMode::Ignore);

        // "aあb" filters to two symbols, so Auto allows four steps.
        let result = conv.convert_word("aあb", &warn).unwrap();
        assert_eq!(result.output, "アアアア");
        assert_eq!(
            result.warnings,
            vec![ConvertWarning::InvalidChars {
                chars: vec!["あ".to_string()]
            }]
        );
    }

    #[test]
    fn test_all_invalid_in_ignore_mode_gives_empty() {
        let conv = looping();
        let ignore = ConvertOptions::default().with_on_invalid_input(ErrorMode::Ignore);
        let result = conv.convert_word("あい", &ignore).unwrap();
        assert_eq!(result.output, "");
        assert!(result.finished);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_incomplete_policies() {
        let conv = looping();
        let opts = ConvertOptions::default().with_max_length(MaxLength::try_from(5usize).unwrap());

        match conv.convert_word("constants", &opts) {
            Err(KanaError::IncompleteConversion { incomplete_output }) => {
                assert_eq!(incomplete_output, "アアアアア")
            }
            other => panic!("expected incomplete conversion, got {other:?}"),
        }

        let warn = opts.clone().with_on_incomplete(ErrorMode::Warning);
        let result = conv.convert_word("constants", &warn).unwrap();
        assert_eq!(result.output, "アアアアア");
        assert!(!result.finished);
        assert!(matches!(
            result.warnings.as_slice(),
            [ConvertWarning::IncompleteConversion { .. }]
        ));

        let ignore = opts.with_on_incomplete(ErrorMode::Ignore);
        let result = conv.convert_word("constants", &ignore).unwrap();
        assert_eq!(result.output, "アアアアア");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_auto_length_is_source_plus_two() {
        let conv = looping();
        let ignore = ConvertOptions::default().with_on_incomplete(ErrorMode::Ignore);
        let result = conv.convert_word("abc", &ignore).unwrap();
        assert_eq!(result.output.chars().count(), 5);
    }

    #[test]
    fn test_finished_conversion_excludes_markers() {
        let conv = stopping();
        let result = conv.convert_word("hello", &ConvertOptions::default()).unwrap();
        assert_eq!(result.output, "");
        assert!(result.finished);
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_greedy_ignores_seed() {
        let conv = looping();
        let opts = ConvertOptions::default().with_on_incomplete(ErrorMode::Ignore);
        let unseeded = conv.convert_word("abc", &opts).unwrap();
        let seeded = conv.convert_word("abc", &opts.clone().with_seed(7)).unwrap();
        assert_eq!(unseeded, seeded);
    }

    #[test]
    fn test_punctuation_is_valid_input() {
        let conv = stopping();
        let result = conv
            .convert_word("rock-n' roll.", &ConvertOptions::default())
            .unwrap();
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_phoneme_converter() {
        let conv = fixed_converter(ModelKind::P2k, bias(kana_index("コ"), EOS_IDX));
        let opts = ConvertOptions::default().with_on_incomplete(ErrorMode::Ignore);

        let result = conv
            .convert_phonemes(&["K", "AA1", "N"], &opts)
            .unwrap();
        assert_eq!(result.output, "コココココ");

        let result = conv.convert_word("K AA1 N", &opts).unwrap();
        assert_eq!(result.output, "コココココ");

        let err = conv
            .convert_phonemes(&["K", "k"], &ConvertOptions::default())
            .unwrap_err();
        assert!(matches!(err, KanaError::InvalidChars { chars } if chars == vec!["k"]));
    }

    #[test]
    fn test_defaults_are_used() {
        let conv = looping().with_defaults(
            ConvertOptions::default()
                .with_on_incomplete(ErrorMode::Ignore)
                .with_max_length(MaxLength::try_from(2usize).unwrap()),
        );
        assert_eq!(conv.convert_word_default("abc").unwrap().output, "アア");
    }

    #[test]
    fn test_metadata_mismatch_rejected() {
        let mut metadata = WeightMetadata {
            eos_idx: Some(3),
            ..WeightMetadata::default()
        };
        let err = verify_metadata(&metadata, Vocabulary::ascii(), Vocabulary::kana()).unwrap_err();
        assert!(matches!(err, KanaError::VocabularyMismatch(_)));

        metadata.eos_idx = Some(EOS_IDX);
        metadata.out_table = Some(KANAS.join("\0"));
        metadata.in_table = Some(kana_vocab::ASCII_ENTRIES.join("\0"));
        assert!(verify_metadata(&metadata, Vocabulary::ascii(), Vocabulary::kana()).is_ok());

        metadata.in_table = Some("<pad>\0<sos>\0<eos>\0a".to_string());
        assert!(verify_metadata(&metadata, Vocabulary::ascii(), Vocabulary::kana()).is_err());
    }

    #[test]
    fn test_converter_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Converter>();
    }
}
