//! DFDC deepfake classifier: `EfficientNet` encoder, global average pool and a
//! single-logit linear head.

use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use tracing::{debug, info};

use super::efficientnet::{EfficientNet, EfficientNetConfig, EncoderKind};
use super::loader::StateDict;
use crate::error::WeightLoadError;
use crate::ports::FrameScorer;

/// Classes of the ImageNet head bundled with every `timm` encoder.
const IMAGENET_CLASSES: usize = 1000;

/// A frame classifier producing one deepfake logit per image.
pub struct DeepFakeClassifier {
    encoder: EfficientNet,
    fc: Linear,
}

impl DeepFakeClassifier {
    /// Builds the classifier from a `VarBuilder` rooted at the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    pub fn new(config: &EfficientNetConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let encoder = EfficientNet::new(config, vb.pp("encoder"))?;
        let features = encoder.num_features();

        // Never evaluated, but must be present and well-formed to bind strictly.
        let head = vb.pp("encoder").pp("classifier");
        head.get((IMAGENET_CLASSES, features), "weight")?;
        head.get(IMAGENET_CLASSES, "bias")?;

        let fc = linear(features, 1, vb.pp("fc"))?;
        Ok(Self { encoder, fc })
    }

    /// Loads a classifier from a weight-set file with strict binding.
    ///
    /// # Errors
    ///
    /// Returns a [`WeightLoadError`] if the file is missing, unreadable, or
    /// does not match the architecture.
    pub fn load(
        path: impl AsRef<Path>,
        config: &EfficientNetConfig,
        device: &Device,
    ) -> Result<Self, WeightLoadError> {
        let path = path.as_ref();
        let dict = StateDict::read(path)?;
        debug!(path = %path.display(), parameters = dict.len(), "Binding weight set");
        let model = dict.build_strict(device, |vb| Self::new(config, vb))?;
        info!(path = %path.display(), "Loaded classifier");
        Ok(model)
    }

    /// Loads a pretrained-encoder classifier.
    ///
    /// # Errors
    ///
    /// See [`DeepFakeClassifier::load`].
    pub fn load_kind(
        path: impl AsRef<Path>,
        kind: EncoderKind,
        device: &Device,
    ) -> Result<Self, WeightLoadError> {
        Self::load(path, &EfficientNetConfig::for_kind(kind), device)
    }
}

impl Module for DeepFakeClassifier {
    /// Maps `(N, 3, S, S)` to `(N, 1)` logits.
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let features = self.encoder.forward(x)?.mean((2, 3))?;
        self.fc.forward(&features)
    }
}

impl FrameScorer for DeepFakeClassifier {
    fn score(&self, input: &Tensor) -> anyhow::Result<f32> {
        let logits = self.forward(input).context("Forward pass failed")?;
        let values = logits
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()
            .context("Failed to read logits")?;
        values
            .first()
            .copied()
            .context("Classifier produced no output")
    }
}
