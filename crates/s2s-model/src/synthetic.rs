//! Randomly initialized weight files for tests and benchmarks.

use std::collections::{HashMap, HashSet};

use kana_core::{KanaError, KanaResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::container::ContainerBuilder;
use crate::model::required_tensors;

/// Builder for a complete, shape-correct set of model weights.
///
/// Values are drawn uniformly from `[-0.5, 0.5)`; layer norm weights start at
/// one and their biases at zero.
#[derive(Debug, Clone)]
pub struct SyntheticWeights {
    input_vocab_size: usize,
    output_vocab_size: usize,
    dim: usize,
    layer_norm: bool,
    double: bool,
    seed: u64,
    overrides: HashMap<String, Vec<f32>>,
    omitted: HashSet<String>,
}

impl SyntheticWeights {
    pub fn new(input_vocab_size: usize, output_vocab_size: usize, dim: usize) -> Self {
        Self {
            input_vocab_size,
            output_vocab_size,
            dim,
            layer_norm: false,
            double: false,
            seed: 0,
            overrides: HashMap::new(),
            omitted: HashSet::new(),
        }
    }

    /// Include the layer norm tensors.
    pub fn with_layer_norm(mut self, layer_norm: bool) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    /// Store every tensor as f64 instead of f32.
    pub fn with_f64(mut self, double: bool) -> Self {
        self.double = double;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use fixed values for one tensor.
    pub fn with_tensor(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.overrides.insert(name.into(), values);
        self
    }

    /// Leave a tensor out entirely.
    pub fn without_tensor(mut self, name: impl Into<String>) -> Self {
        self.omitted.insert(name.into());
        self
    }

    /// Fill a container builder with every tensor.
    pub fn builder(&self) -> KanaResult<ContainerBuilder> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut builder = ContainerBuilder::new();
        let tensors = required_tensors(
            self.dim,
            self.input_vocab_size,
            self.output_vocab_size,
            self.layer_norm,
        );

        for (name, shape) in tensors {
            let count: usize = shape.iter().product();
            // Draw even for omitted tensors so the remaining values do not shift.
            let random: Vec<f32> = (0..count).map(|_| rng.gen_range(-0.5..0.5)).collect();
            if self.omitted.contains(&name) {
                continue;
            }

            let values = match self.overrides.get(&name) {
                Some(values) if values.len() == count => values.clone(),
                Some(values) => {
                    return Err(KanaError::ShapeMismatch {
                        name,
                        expected: shape,
                        actual: vec![values.len()],
                    })
                }
                None if name.ends_with("_norm.weight") => vec![1.0; count],
                None if name.ends_with("_norm.bias") => vec![0.0; count],
                None => random,
            };
            if self.double {
                let values: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
                builder.add_f64(name, &shape, &values);
            } else {
                builder.add_f32(name, &shape, &values);
            }
        }
        Ok(builder)
    }

    /// Serialize as an E2KM container.
    pub fn to_bytes(&self) -> KanaResult<Vec<u8>> {
        self.builder()?.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn test_same_seed_same_bytes() {
        let a = SyntheticWeights::new(5, 6, 4).with_seed(1).to_bytes().unwrap();
        let b = SyntheticWeights::new(5, 6, 4).with_seed(1).to_bytes().unwrap();
        let c = SyntheticWeights::new(5, 6, 4).with_seed(2).to_bytes().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_overrides_and_omissions() {
        let bytes = SyntheticWeights::new(5, 6, 4)
            .with_layer_norm(true)
            .with_tensor("fc.bias", vec![1.0; 6])
            .without_tensor("fc.weight")
            .to_bytes()
            .unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert!(container.get("fc.weight").is_none());
        assert!(container.get("attn_norm.weight").is_some());
        assert_eq!(container.len(), 33);
    }

    #[test]
    fn test_f64_storage() {
        let bytes = SyntheticWeights::new(5, 6, 4).with_f64(true).to_bytes().unwrap();
        let container = Container::parse(&bytes).unwrap();
        assert!(container
            .tensors()
            .iter()
            .all(|t| t.dtype() == crate::container::ElementType::F64));
    }

    #[test]
    fn test_override_length_checked() {
        let err = SyntheticWeights::new(5, 6, 4)
            .with_tensor("fc.bias", vec![1.0; 3])
            .to_bytes()
            .unwrap_err();
        assert!(matches!(err, KanaError::ShapeMismatch { .. }));
    }
}
