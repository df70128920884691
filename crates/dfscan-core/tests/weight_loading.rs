//! Strict weight-set binding against the real classifier architecture,
//! exercised with tiny generated weight sets.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use dfscan_core::inference::{DeepFakeClassifier, EncoderKind};
use dfscan_core::{FrameAnalyzer, FrameScorer, ModelPool, Preprocessor, WeightLoadError};
use dfscan_test_support::{SyntheticFrameBuilder, TinyWeights};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, weights: &TinyWeights) -> PathBuf {
    let path = dir.path().join(name);
    weights.save(&path).unwrap();
    path
}

fn tiny_input() -> Tensor {
    let size = TinyWeights::INPUT_SIZE as usize;
    Tensor::rand(0f32, 1f32, (1, 3, size, size), &Device::Cpu).unwrap()
}

fn expect_incompatible(path: &PathBuf) -> String {
    match DeepFakeClassifier::load(path, &TinyWeights::config(), &Device::Cpu) {
        Err(err @ WeightLoadError::Incompatible { .. }) => err.to_string(),
        Err(other) => panic!("expected Incompatible, got {other}"),
        Ok(_) => panic!("weight set should have been rejected"),
    }
}

#[test]
fn test_tiny_weights_load_and_score() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "tiny.safetensors", &TinyWeights::generate().unwrap());

    let pool = ModelPool::load_with_config(&[path], &TinyWeights::config(), &Device::Cpu).unwrap();
    assert_eq!(pool.names().collect::<Vec<_>>(), vec!["tiny.safetensors"]);

    let analyzer = FrameAnalyzer::new(
        pool,
        Preprocessor::new(TinyWeights::INPUT_SIZE, Device::Cpu),
    );
    let frame = SyntheticFrameBuilder::checkerboard(64, 48, 4);
    let analysis = analyzer.analyze_image(&frame.image).unwrap();
    assert!((0.0..=1.0).contains(&analysis.deepfake_probability));
    assert_eq!(analysis.model_probabilities.len(), 1);
}

#[test]
fn test_prefixed_and_plain_keys_score_identically() {
    let dir = tempfile::tempdir().unwrap();
    let weights = TinyWeights::generate().unwrap();
    let plain = write(&dir, "plain.safetensors", &weights);
    let prefixed = dir.path().join("prefixed.safetensors");
    weights.save_prefixed(&prefixed).unwrap();

    let config = TinyWeights::config();
    let a = DeepFakeClassifier::load(&plain, &config, &Device::Cpu).unwrap();
    let b = DeepFakeClassifier::load(&prefixed, &config, &Device::Cpu).unwrap();

    let input = tiny_input();
    assert_eq!(a.score(&input).unwrap(), b.score(&input).unwrap());
}

#[test]
fn test_scoring_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "tiny.safetensors", &TinyWeights::generate().unwrap());
    let model = DeepFakeClassifier::load(&path, &TinyWeights::config(), &Device::Cpu).unwrap();

    let input = tiny_input();
    assert_eq!(model.score(&input).unwrap(), model.score(&input).unwrap());
}

#[test]
fn test_batch_counters_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let weights = TinyWeights::generate().unwrap().with_batch_counters().unwrap();
    let path = write(&dir, "counters.safetensors", &weights);
    assert!(DeepFakeClassifier::load(&path, &TinyWeights::config(), &Device::Cpu).is_ok());
}

#[test]
fn test_missing_parameter_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let mut weights = TinyWeights::generate().unwrap();
    weights.tensors_mut().remove("encoder.blocks.3.0.se.conv_expand.weight");
    let path = write(&dir, "missing.safetensors", &weights);

    let message = expect_incompatible(&path);
    assert!(message.contains("encoder.blocks.3.0.se.conv_expand.weight"));
}

#[test]
fn test_unexpected_parameter_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let mut weights = TinyWeights::generate().unwrap();
    weights.tensors_mut().insert(
        "fc2.weight".to_string(),
        Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap(),
    );
    let path = write(&dir, "extra.safetensors", &weights);

    let message = expect_incompatible(&path);
    assert!(message.contains("fc2.weight"));
}

#[test]
fn test_wrong_shape_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let mut weights = TinyWeights::generate().unwrap();
    let features = weights.tensors_mut()["fc.weight"].dims()[1];
    weights.tensors_mut().insert(
        "fc.weight".to_string(),
        Tensor::zeros((2, features), DType::F32, &Device::Cpu).unwrap(),
    );
    let path = write(&dir, "shape.safetensors", &weights);

    let message = expect_incompatible(&path);
    assert!(message.contains("fc.weight"));
}

#[test]
fn test_wrong_encoder_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "tiny.safetensors", &TinyWeights::generate().unwrap());

    let result = ModelPool::load(&[path], EncoderKind::B3, &Device::Cpu);
    assert!(matches!(result, Err(WeightLoadError::Incompatible { .. })));
}

#[test]
fn test_missing_weight_set_aborts_whole_pool() {
    let dir = tempfile::tempdir().unwrap();
    let good = write(&dir, "good.safetensors", &TinyWeights::generate().unwrap());
    let absent = dir.path().join("final_555_DeepFakeClassifier_tf_efficientnet_b7_ns_0_19");

    let result = ModelPool::load_with_config(&[good, absent], &TinyWeights::config(), &Device::Cpu);
    let Err(WeightLoadError::Missing { path }) = result else {
        panic!("a missing weight set must fail the whole load");
    };
    assert!(path.ends_with("final_555_DeepFakeClassifier_tf_efficientnet_b7_ns_0_19"));
}

#[test]
fn test_no_weight_sets_is_an_error() {
    let result = ModelPool::load_with_config(&[], &TinyWeights::config(), &Device::Cpu);
    assert!(matches!(result, Err(WeightLoadError::NoWeightSets)));
}
