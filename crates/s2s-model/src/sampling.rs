//! Decoding strategies for next-symbol selection.

use kana_core::{Strategy, StrategyTopK, StrategyTopP};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-call random source for sampling strategies.
#[derive(Debug)]
pub struct SamplerRng {
    rng: Option<StdRng>,
}

impl SamplerRng {
    /// Seeded when `seed` is given, otherwise drawn from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Some(rng) }
    }

    /// Random source for one decode with `strategy`.
    ///
    /// Greedy decoding never draws, so no generator is built for it.
    pub fn for_strategy(strategy: &Strategy, seed: Option<u64>) -> Self {
        if strategy.is_sampling() {
            Self::new(seed)
        } else {
            Self { rng: None }
        }
    }

    /// Whether a generator backs this source.
    pub fn is_random(&self) -> bool {
        self.rng.is_some()
    }

    fn pick(&mut self, n: usize) -> usize {
        match self.rng.as_mut() {
            Some(rng) => rng.gen_range(0..n),
            // Only reachable when a sampling strategy is paired with a greedy source.
            None => 0,
        }
    }
}

/// Select the next symbol from `logits` with `strategy`.
pub fn select(strategy: &Strategy, logits: &[f32], rng: &mut SamplerRng) -> usize {
    match strategy {
        Strategy::Greedy => greedy(logits),
        Strategy::TopK(StrategyTopK { k }) => top_k(logits, *k, rng),
        Strategy::TopP(StrategyTopP { top_p: p, temperature }) => {
            top_p(logits, *p, *temperature, rng)
        }
    }
}

/// First index of the maximum logit.
pub fn greedy(logits: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in logits.iter().enumerate() {
        if v > logits[best] {
            best = i;
        }
    }
    best
}

/// Uniform choice among the `k` highest logits.
pub fn top_k(logits: &[f32], k: usize, rng: &mut SamplerRng) -> usize {
    if logits.is_empty() {
        return 0;
    }
    let mut order = descending(logits);
    order.truncate(k.clamp(1, logits.len()));
    order[rng.pick(order.len())]
}

/// Uniform choice inside the smallest prefix of the tempered distribution
/// whose mass reaches `p`.
pub fn top_p(logits: &[f32], p: f32, temperature: f32, rng: &mut SamplerRng) -> usize {
    if logits.is_empty() {
        return 0;
    }
    if temperature <= f32::EPSILON {
        return greedy(logits);
    }

    let scaled: Vec<f32> = logits.iter().map(|&x| x / temperature).collect();
    let probs = softmax(&scaled);
    let order = descending(&probs);

    let mut mass = 0.0;
    let mut keep = 0;
    for &i in &order {
        if mass >= p && keep > 0 {
            break;
        }
        mass += probs[i];
        keep += 1;
    }
    order[rng.pick(keep)]
}

/// Indices sorted by value, highest first; ties keep index order.
fn descending(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Compute softmax of a slice of values.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        exp.iter().map(|&x| x / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}
