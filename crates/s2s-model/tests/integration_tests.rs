//! Integration tests for s2s-model crate.
//!
//! These tests load synthetic weight files through every public entry point.

use std::num::NonZeroUsize;

use kana_core::{KanaError, S2sArchitecture, Strategy};
use s2s_model::{
    Container, S2sConfig, S2sModel, SamplerRng, SyntheticWeights, WeightFormat, WeightStore,
};

const VI: usize = 12;
const VO: usize = 16;
const DIM: usize = 16;

fn weights() -> SyntheticWeights {
    SyntheticWeights::new(VI, VO, DIM).with_seed(17)
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.e2km");
    std::fs::write(&path, weights().to_bytes().unwrap()).unwrap();

    let model = S2sModel::load(&path, S2sConfig::new(VI, VO)).expect("should load model");
    assert_eq!(model.dim(), DIM);

    let out = model
        .infer(
            &[3, 4, 5],
            NonZeroUsize::new(8).unwrap(),
            &Strategy::Greedy,
            &mut SamplerRng::new(None),
        )
        .expect("should decode");
    assert_eq!(out.tokens[0], 1);
    assert!(out.tokens.len() <= 9);
    assert_eq!(out.finished, out.tokens.last() == Some(&2));
}

#[test]
fn test_missing_file() {
    let err = S2sModel::load("/nonexistent/model.e2km", S2sConfig::new(VI, VO)).unwrap_err();
    assert!(matches!(err, KanaError::ModelLoad { .. }));
    assert!(err.is_load_error());
}

#[test]
fn test_truncated_file_never_loads() {
    let bytes = weights().to_bytes().unwrap();
    // Every cut inside the header and first records, then a coarse sweep.
    let cuts = (0..256).chain((256..bytes.len()).step_by(97));
    for len in cuts {
        let result = WeightStore::from_bytes(&bytes[..len])
            .and_then(|store| S2sModel::new(&store, S2sConfig::new(VI, VO)));
        assert!(result.is_err(), "cut at {len} should fail");
    }
}

#[test]
fn test_container_and_safetensors_agree() {
    let bytes = weights().to_bytes().unwrap();
    let container_store = WeightStore::from_bytes(&bytes).unwrap();
    assert_eq!(container_store.format(), WeightFormat::Container);

    // Re-export every tensor as safetensors.
    let container = Container::parse(&bytes).unwrap();
    let device = candle_core::Device::Cpu;
    let tensors: Vec<(String, candle_core::Tensor)> = container
        .tensors()
        .iter()
        .map(|raw| (raw.name().to_string(), raw.to_tensor(&device).unwrap()))
        .collect();
    let st_bytes = safetensors::serialize(tensors.iter().map(|(n, t)| (n.as_str(), t)), &None).unwrap();
    let st_store = WeightStore::from_bytes(&st_bytes).unwrap();
    assert_eq!(st_store.format(), WeightFormat::Safetensors);

    let config = S2sConfig::new(VI, VO);
    let a = S2sModel::new(&container_store, config.clone()).unwrap();
    let b = S2sModel::new(&st_store, config).unwrap();

    let max = NonZeroUsize::new(10).unwrap();
    let out_a = a.infer(&[3, 7, 9], max, &Strategy::Greedy, &mut SamplerRng::new(None)).unwrap();
    let out_b = b.infer(&[3, 7, 9], max, &Strategy::Greedy, &mut SamplerRng::new(None)).unwrap();
    assert_eq!(out_a, out_b);
}

#[test]
fn test_normalized_architecture_runs() {
    let bytes = weights().with_layer_norm(true).to_bytes().unwrap();
    let store = WeightStore::from_bytes(&bytes).unwrap();
    let model = S2sModel::new(
        &store,
        S2sConfig::new(VI, VO).with_architecture(S2sArchitecture::normalized()),
    )
    .unwrap();

    let out = model
        .infer(
            &[4, 4, 4],
            NonZeroUsize::new(6).unwrap(),
            &Strategy::top_p(0.9, 1.0),
            &mut SamplerRng::new(Some(3)),
        )
        .unwrap();
    // END is never the first emitted symbol.
    assert!(out.tokens.len() >= 2);
    assert_ne!(out.tokens[1], 2);
}

#[test]
fn test_concurrent_inference_shares_model() {
    let store = WeightStore::from_bytes(&weights().to_bytes().unwrap()).unwrap();
    let model = std::sync::Arc::new(S2sModel::new(&store, S2sConfig::new(VI, VO)).unwrap());
    let max = NonZeroUsize::new(8).unwrap();
    let expected = model
        .infer(&[5, 6], max, &Strategy::Greedy, &mut SamplerRng::new(None))
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let model = model.clone();
            std::thread::spawn(move || {
                model
                    .infer(&[5, 6], max, &Strategy::Greedy, &mut SamplerRng::new(None))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
