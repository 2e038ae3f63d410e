//! Encoder–decoder forward pass.
//!
//! A conversion runs through these states:
//!
//! - **Encoding**: `[START] + source + [END]` is embedded and run through a
//!   forward and a reverse GRU; the concatenated states are projected back to
//!   the model width with `tanh(Linear(..))`.
//! - **Stepping**: the last emitted symbol is embedded and fed through the
//!   pre-decoder GRU, attention over the encoder states, the post-decoder GRU
//!   and the output projection. The strategy picks the next symbol.
//! - **Completed** when END is picked, **Truncated** when the step budget runs
//!   out first.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;

use candle_core::{DType, Tensor};
use kana_core::{KanaError, KanaResult, S2sArchitecture, Strategy};
use tracing::{debug, info, instrument};

use crate::config::S2sConfig;
use crate::layers::{tanh, Embedding, Gru, GruCell, LayerNorm, Linear, MultiHeadAttention};
use crate::sampling::{self, SamplerRng};
use crate::weights::WeightStore;

/// Raw decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S2sOutput {
    /// Emitted symbols, starting with START and ending with END when finished.
    pub tokens: Vec<usize>,
    /// Whether END was emitted within the step budget.
    pub finished: bool,
}

impl S2sOutput {
    /// Symbols between the START and END markers.
    pub fn body(&self) -> &[usize] {
        let start = usize::from(!self.tokens.is_empty());
        let end = if self.finished {
            self.tokens.len().saturating_sub(1).max(start)
        } else {
            self.tokens.len()
        };
        &self.tokens[start..end]
    }
}

/// Names and shapes of every tensor a model of this layout reads.
pub fn required_tensors(
    dim: usize,
    input_vocab_size: usize,
    output_vocab_size: usize,
    layer_norm: bool,
) -> Vec<(String, Vec<usize>)> {
    let d = dim;
    let mut tensors = vec![
        ("e_emb.weight".to_string(), vec![input_vocab_size, d]),
        ("k_emb.weight".to_string(), vec![output_vocab_size, d]),
    ];
    for (prefix, suffix, input) in [
        ("encoder", "_l0", d),
        ("encoder", "_l0_reverse", d),
        ("pre_decoder", "_l0", d),
        ("post_decoder", "_l0", 2 * d),
    ] {
        tensors.push((format!("{prefix}.weight_ih{suffix}"), vec![3 * d, input]));
        tensors.push((format!("{prefix}.weight_hh{suffix}"), vec![3 * d, d]));
        tensors.push((format!("{prefix}.bias_ih{suffix}"), vec![3 * d]));
        tensors.push((format!("{prefix}.bias_hh{suffix}"), vec![3 * d]));
    }
    tensors.extend([
        ("encoder_fc.0.weight".to_string(), vec![d, 2 * d]),
        ("encoder_fc.0.bias".to_string(), vec![d]),
        ("attn.in_proj_weight".to_string(), vec![3 * d, d]),
        ("attn.in_proj_bias".to_string(), vec![3 * d]),
        ("attn.out_proj.weight".to_string(), vec![d, d]),
        ("attn.out_proj.bias".to_string(), vec![d]),
        ("fc.weight".to_string(), vec![output_vocab_size, d]),
        ("fc.bias".to_string(), vec![output_vocab_size]),
    ]);
    if layer_norm {
        for (name, width) in [
            ("encoder_norm", 2 * d),
            ("pre_dec_norm", d),
            ("attn_norm", d),
            ("post_dec_norm", d),
        ] {
            tensors.push((format!("{name}.weight"), vec![width]));
            tensors.push((format!("{name}.bias"), vec![width]));
        }
    }
    tensors
}

#[derive(Debug)]
struct Norms {
    encoder: LayerNorm,
    pre_dec: LayerNorm,
    attn: LayerNorm,
    post_dec: LayerNorm,
}

/// Per-call recurrent state of the two decoder GRUs.
#[derive(Debug, Default)]
struct DecoderState {
    h1: Option<Tensor>,
    h2: Option<Tensor>,
}

/// A loaded, immutable encoder–decoder model.
#[derive(Debug)]
pub struct S2sModel {
    e_emb: Embedding,
    k_emb: Embedding,
    encoder: Gru,
    encoder_reverse: Gru,
    encoder_fc: Linear,
    pre_decoder: GruCell,
    attn: MultiHeadAttention,
    post_decoder: GruCell,
    fc: Linear,
    norms: Option<Norms>,
    config: S2sConfig,
    dim: usize,
    dtype: DType,
}

impl S2sModel {
    /// Load a model from a weight file.
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, config: S2sConfig) -> KanaResult<Self> {
        let store = WeightStore::load(path)?;
        Self::new(&store, config)
    }

    /// Build a model from loaded weights, checking every tensor shape.
    pub fn new(store: &WeightStore, config: S2sConfig) -> KanaResult<Self> {
        config.validate()?;
        let dim = match config.dim {
            Some(dim) => dim,
            None => match store.shape_of("e_emb.weight") {
                Some(&[_, dim]) => dim,
                Some(other) => {
                    return Err(KanaError::ShapeMismatch {
                        name: "e_emb.weight".to_string(),
                        expected: vec![config.input_vocab_size, 0],
                        actual: other.to_vec(),
                    })
                }
                None => return Err(KanaError::MissingTensor("e_emb.weight".to_string())),
            },
        };
        let config = S2sConfig {
            dim: Some(dim),
            ..config
        };
        config.validate()?;

        let arch = &config.architecture;
        let dtype = arch
            .dtype
            .resolve(store.describe().into_iter().map(|t| t.stored_dtype));
        let shapes: HashMap<String, Vec<usize>> = required_tensors(
            dim,
            config.input_vocab_size,
            config.output_vocab_size,
            arch.layer_norm,
        )
        .into_iter()
        .collect();

        let get = |name: &str| -> KanaResult<Tensor> {
            let shape = shapes
                .get(name)
                .ok_or_else(|| KanaError::internal(format!("no shape for {name}")))?;
            store.get(name, shape, dtype)
        };
        let gru_cell = |prefix: &str, suffix: &str| -> KanaResult<GruCell> {
            Ok(GruCell::new(
                get(&format!("{prefix}.weight_ih{suffix}"))?,
                get(&format!("{prefix}.weight_hh{suffix}"))?,
                get(&format!("{prefix}.bias_ih{suffix}"))?,
                get(&format!("{prefix}.bias_hh{suffix}"))?,
            )?)
        };
        let norm = |name: &str| -> KanaResult<LayerNorm> {
            Ok(LayerNorm::new(
                get(&format!("{name}.weight"))?,
                get(&format!("{name}.bias"))?,
                LayerNorm::DEFAULT_EPS,
            ))
        };

        let norms = if arch.layer_norm {
            Some(Norms {
                encoder: norm("encoder_norm")?,
                pre_dec: norm("pre_dec_norm")?,
                attn: norm("attn_norm")?,
                post_dec: norm("post_dec_norm")?,
            })
        } else {
            None
        };

        let scale = arch.attention_scale.divisor(dim, arch.num_heads);
        let model = Self {
            e_emb: Embedding::new(get("e_emb.weight")?)?,
            k_emb: Embedding::new(get("k_emb.weight")?)?,
            encoder: Gru::new(gru_cell("encoder", "_l0")?, false),
            encoder_reverse: Gru::new(gru_cell("encoder", "_l0_reverse")?, true),
            encoder_fc: Linear::new(get("encoder_fc.0.weight")?, get("encoder_fc.0.bias")?)?,
            pre_decoder: gru_cell("pre_decoder", "_l0")?,
            attn: MultiHeadAttention::new(
                get("attn.in_proj_weight")?,
                get("attn.in_proj_bias")?,
                get("attn.out_proj.weight")?,
                get("attn.out_proj.bias")?,
                arch.num_heads,
                scale,
            )?,
            post_decoder: gru_cell("post_decoder", "_l0")?,
            fc: Linear::new(get("fc.weight")?, get("fc.bias")?)?,
            norms,
            dim,
            dtype,
            config,
        };

        info!(
            dim,
            input_vocab = model.config.input_vocab_size,
            output_vocab = model.config.output_vocab_size,
            layer_norm = model.config.architecture.layer_norm,
            dtype = ?model.dtype,
            "Sequence model ready"
        );
        Ok(model)
    }

    pub fn config(&self) -> &S2sConfig {
        &self.config
    }

    pub fn architecture(&self) -> &S2sArchitecture {
        &self.config.architecture
    }

    /// Hidden width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Encoder states `(len + 2, dim)` for a source of input-table indices.
    pub fn encode(&self, source: &[usize]) -> KanaResult<Tensor> {
        let mut ids = Vec::with_capacity(source.len() + 2);
        ids.push(self.config.start_id);
        ids.extend_from_slice(source);
        ids.push(self.config.end_id);

        let emb = self.e_emb.forward(&ids)?;
        let (fwd, _) = self.encoder.forward(&emb, None)?;
        let (rev, _) = self.encoder_reverse.forward(&emb, None)?;
        let mut enc = Tensor::cat(&[&fwd, &rev], 1)?;
        if let Some(norms) = &self.norms {
            enc = norms.encoder.forward(&enc)?;
        }
        Ok(tanh(&self.encoder_fc.forward(&enc)?)?)
    }

    /// Logits for the symbol following `last`, advancing `state`.
    fn step(&self, last: usize, enc: &Tensor, state: &mut DecoderState) -> KanaResult<Vec<f32>> {
        let x = self.k_emb.forward(&[last])?.squeeze(0)?;

        let h1 = self.pre_decoder.forward(&x, state.h1.as_ref())?;
        let dec = match &self.norms {
            Some(norms) => norms.pre_dec.forward(&h1)?,
            None => h1.clone(),
        };
        state.h1 = Some(h1);

        let attn = self.attn.forward(&dec.unsqueeze(0)?, enc, enc)?.squeeze(0)?;
        let attn = match &self.norms {
            Some(norms) => norms.attn.forward(&attn)?,
            None => attn,
        };

        let joined = Tensor::cat(&[&dec, &attn], 0)?;
        let h2 = self.post_decoder.forward(&joined, state.h2.as_ref())?;
        let out = match &self.norms {
            Some(norms) => norms.post_dec.forward(&h2)?,
            None => h2.clone(),
        };
        state.h2 = Some(h2);

        let logits = self.fc.forward(&out)?.to_dtype(DType::F32)?;
        Ok(logits.to_vec1::<f32>()?)
    }

    /// Decode a source sequence for at most `max_steps` steps.
    #[instrument(skip(self, source, strategy, rng), fields(source_len = source.len(), max_steps = max_steps.get()))]
    pub fn infer(
        &self,
        source: &[usize],
        max_steps: NonZeroUsize,
        strategy: &Strategy,
        rng: &mut SamplerRng,
    ) -> KanaResult<S2sOutput> {
        let enc = self.encode(source)?;
        let (start, end) = (self.config.start_id, self.config.end_id);

        let mut tokens = vec![start];
        let mut state = DecoderState::default();
        let mut finished = false;

        for step in 0..max_steps.get() {
            let last = tokens[tokens.len() - 1];
            let mut logits = self.step(last, &enc, &mut state)?;
            if step == 0 && self.config.architecture.suppress_eos_on_first_step {
                logits[end] = f32::MIN;
            }

            let next = sampling::select(strategy, &logits, rng);
            debug!(step, next, "decode step");
            tokens.push(next);
            if next == end {
                finished = true;
                break;
            }
        }

        debug!(steps = tokens.len() - 1, finished, "decode finished");
        Ok(S2sOutput { tokens, finished })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticWeights;
    use kana_core::AttentionScale;

    const VI: usize = 8;
    const VO: usize = 10;
    const DIM: usize = 8;

    fn model_with(weights: SyntheticWeights, arch: S2sArchitecture) -> S2sModel {
        let store = WeightStore::from_bytes(&weights.to_bytes().unwrap()).unwrap();
        S2sModel::new(&store, S2sConfig::new(VI, VO).with_architecture(arch)).unwrap()
    }

    /// Zero output weights with a fixed bias make every step's logits equal the bias.
    fn constant_logits(bias: Vec<f32>, layer_norm: bool) -> SyntheticWeights {
        SyntheticWeights::new(VI, VO, DIM)
            .with_layer_norm(layer_norm)
            .with_tensor("fc.weight", vec![0.0; VO * DIM])
            .with_tensor("fc.bias", bias)
    }

    fn bias_favoring(winner: usize, runner_up: usize) -> Vec<f32> {
        let mut bias = vec![0.0; VO];
        bias[winner] = 2.0;
        bias[runner_up] = 1.0;
        bias
    }

    #[test]
    fn test_required_tensor_count() {
        assert_eq!(required_tensors(4, 5, 6, false).len(), 26);
        assert_eq!(required_tensors(4, 5, 6, true).len(), 34);
    }

    #[test]
    fn test_dim_inferred_from_embedding() {
        let model = model_with(SyntheticWeights::new(VI, VO, DIM), S2sArchitecture::default());
        assert_eq!(model.dim(), DIM);
        assert_eq!(model.config().dim, Some(DIM));
    }

    #[test]
    fn test_encode_shape() {
        let model = model_with(SyntheticWeights::new(VI, VO, DIM), S2sArchitecture::default());
        let enc = model.encode(&[3, 4, 5]).unwrap();
        assert_eq!(enc.dims(), &[5, DIM]);
        let values = enc.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_immediate_end_marker() {
        let model = model_with(constant_logits(bias_favoring(2, 4), false), S2sArchitecture::default());
        let out = model
            .infer(&[3, 4], NonZeroUsize::new(5).unwrap(), &Strategy::Greedy, &mut SamplerRng::new(None))
            .unwrap();
        assert_eq!(out.tokens, vec![1, 2]);
        assert!(out.finished);
        assert!(out.body().is_empty());
    }

    #[test]
    fn test_end_suppressed_on_first_step() {
        let model = model_with(constant_logits(bias_favoring(2, 4), true), S2sArchitecture::normalized());
        let out = model
            .infer(&[3, 4], NonZeroUsize::new(5).unwrap(), &Strategy::Greedy, &mut SamplerRng::new(None))
            .unwrap();
        assert_eq!(out.tokens, vec![1, 4, 2]);
        assert!(out.finished);
        assert_eq!(out.body(), &[4]);
    }

    #[test]
    fn test_truncation_at_step_budget() {
        let model = model_with(constant_logits(bias_favoring(4, 2), false), S2sArchitecture::default());
        let out = model
            .infer(&[3], NonZeroUsize::new(5).unwrap(), &Strategy::Greedy, &mut SamplerRng::new(None))
            .unwrap();
        assert_eq!(out.tokens, vec![1, 4, 4, 4, 4, 4]);
        assert!(!out.finished);
        assert_eq!(out.body().len(), 5);
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let model = model_with(SyntheticWeights::new(VI, VO, DIM).with_seed(9), S2sArchitecture::default());
        let max = NonZeroUsize::new(12).unwrap();
        let a = model.infer(&[3, 5, 7], max, &Strategy::Greedy, &mut SamplerRng::new(None)).unwrap();
        let b = model.infer(&[3, 5, 7], max, &Strategy::Greedy, &mut SamplerRng::new(None)).unwrap();
        assert_eq!(a, b);
        assert!(a.tokens.iter().all(|&t| t < VO));
        assert!(a.tokens.len() <= 13);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let model = model_with(SyntheticWeights::new(VI, VO, DIM).with_seed(5), S2sArchitecture::default());
        let max = NonZeroUsize::new(10).unwrap();
        let strategy = Strategy::top_k(3);
        let a = model.infer(&[4, 6], max, &strategy, &mut SamplerRng::new(Some(1))).unwrap();
        let b = model.infer(&[4, 6], max, &strategy, &mut SamplerRng::new(Some(1))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_f64_weights_run_in_f64() {
        let weights = SyntheticWeights::new(VI, VO, DIM).with_seed(3).with_f64(true);
        let model = model_with(weights.clone(), S2sArchitecture::default());
        assert_eq!(model.dtype(), DType::F64);
        let out = model
            .infer(&[3, 4], NonZeroUsize::new(6).unwrap(), &Strategy::Greedy, &mut SamplerRng::new(None))
            .unwrap();
        assert!(out.tokens.iter().all(|&t| t < VO));

        let forced = model_with(
            weights,
            S2sArchitecture {
                dtype: kana_core::ComputeDType::F32,
                ..S2sArchitecture::default()
            },
        );
        assert_eq!(forced.dtype(), DType::F32);

        let f32_model = model_with(SyntheticWeights::new(VI, VO, DIM), S2sArchitecture::default());
        assert_eq!(f32_model.dtype(), DType::F32);
    }

    #[test]
    fn test_f64_matches_f32() {
        let weights = || SyntheticWeights::new(VI, VO, DIM).with_seed(3);
        let f32_model = model_with(weights(), S2sArchitecture::default());
        let f64_model = model_with(
            weights(),
            S2sArchitecture {
                dtype: kana_core::ComputeDType::F64,
                ..S2sArchitecture::default()
            },
        );
        assert_eq!(f64_model.dtype(), DType::F64);

        let a = f32_model.encode(&[3, 4]).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = f64_model
            .encode(&[3, 4])
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f64>()
            .unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((*x as f64 - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_attention_scale_changes_output() {
        let weights = || SyntheticWeights::new(VI, VO, DIM).with_seed(4);
        let model_dim = model_with(weights(), S2sArchitecture::default());
        let head_dim = model_with(
            weights(),
            S2sArchitecture {
                attention_scale: AttentionScale::HeadDim,
                ..S2sArchitecture::default()
            },
        );
        assert!((model_dim.attn.scale() - (DIM as f64).sqrt()).abs() < 1e-12);
        assert!((head_dim.attn.scale() - ((DIM / 4) as f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_tensor_rejected() {
        let weights = SyntheticWeights::new(VI, VO, DIM).without_tensor("attn.out_proj.bias");
        let store = WeightStore::from_bytes(&weights.to_bytes().unwrap()).unwrap();
        let err = S2sModel::new(&store, S2sConfig::new(VI, VO)).unwrap_err();
        assert!(matches!(err, KanaError::MissingTensor(name) if name == "attn.out_proj.bias"));
    }

    #[test]
    fn test_norm_tensors_required_for_normalized() {
        let store =
            WeightStore::from_bytes(&SyntheticWeights::new(VI, VO, DIM).to_bytes().unwrap()).unwrap();
        let config = S2sConfig::new(VI, VO).with_architecture(S2sArchitecture::normalized());
        assert!(matches!(
            S2sModel::new(&store, config),
            Err(KanaError::MissingTensor(_))
        ));
    }

    #[test]
    fn test_vocab_size_mismatch_rejected() {
        let store =
            WeightStore::from_bytes(&SyntheticWeights::new(VI, VO, DIM).to_bytes().unwrap()).unwrap();
        let err = S2sModel::new(&store, S2sConfig::new(VI + 1, VO)).unwrap_err();
        assert!(matches!(err, KanaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_out_of_range_source_rejected() {
        let model = model_with(SyntheticWeights::new(VI, VO, DIM), S2sArchitecture::default());
        assert!(model.encode(&[VI]).is_err());
    }

    #[test]
    fn test_model_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<S2sModel>();
    }
}
