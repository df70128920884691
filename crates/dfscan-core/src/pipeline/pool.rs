//! The ordered, immutable set of scorers every frame is fanned out to.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::domain::FrameAnalysis;
use crate::error::{InferenceError, WeightLoadError};
use crate::inference::{
    mean_probability, sigmoid, DeepFakeClassifier, EfficientNetConfig, EncoderKind,
};
use crate::ports::FrameScorer;

/// One loaded scorer and the name it is reported under.
pub struct PoolMember {
    name: String,
    scorer: Box<dyn FrameScorer>,
}

impl PoolMember {
    /// Wraps a scorer under a display name.
    #[must_use]
    pub fn new(name: impl Into<String>, scorer: Box<dyn FrameScorer>) -> Self {
        Self {
            name: name.into(),
            scorer,
        }
    }

    /// Display name (weight-set file name for loaded classifiers).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for PoolMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMember").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Non-empty, insertion-ordered collection of scorers.
#[derive(Debug)]
pub struct ModelPool {
    members: Vec<PoolMember>,
}

impl ModelPool {
    /// Builds a pool from already constructed members.
    ///
    /// # Errors
    ///
    /// Returns [`WeightLoadError::NoWeightSets`] if `members` is empty.
    pub fn new(members: Vec<PoolMember>) -> Result<Self, WeightLoadError> {
        if members.is_empty() {
            return Err(WeightLoadError::NoWeightSets);
        }
        Ok(Self { members })
    }

    /// Builds a pool from bare scorers, naming them `model-0`, `model-1`, ...
    ///
    /// # Errors
    ///
    /// Returns [`WeightLoadError::NoWeightSets`] if `scorers` is empty.
    pub fn from_scorers(scorers: Vec<Box<dyn FrameScorer>>) -> Result<Self, WeightLoadError> {
        let members = scorers
            .into_iter()
            .enumerate()
            .map(|(i, scorer)| PoolMember::new(format!("model-{i}"), scorer))
            .collect();
        Self::new(members)
    }

    /// Loads one DFDC classifier per weight set, in order.
    ///
    /// The encoder is taken from the file name when it names one
    /// (`..._tf_efficientnet_b7_ns_...`), otherwise `default_encoder` is used.
    /// Any failure aborts the whole load; a partial pool is never returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`WeightLoadError`] encountered.
    pub fn load(
        weights: &[PathBuf],
        default_encoder: EncoderKind,
        device: &Device,
    ) -> Result<Self, WeightLoadError> {
        Self::load_each(weights, |path| {
            let kind = EncoderKind::from_weight_name(&member_name(path)).unwrap_or(default_encoder);
            debug!(path = %path.display(), encoder = %kind, "Selected encoder");
            EfficientNetConfig::for_kind(kind)
        }, device)
    }

    /// Loads every weight set against one fixed architecture.
    ///
    /// # Errors
    ///
    /// Returns the first [`WeightLoadError`] encountered.
    pub fn load_with_config(
        weights: &[PathBuf],
        config: &EfficientNetConfig,
        device: &Device,
    ) -> Result<Self, WeightLoadError> {
        Self::load_each(weights, |_| *config, device)
    }

    fn load_each(
        weights: &[PathBuf],
        config_for: impl Fn(&Path) -> EfficientNetConfig,
        device: &Device,
    ) -> Result<Self, WeightLoadError> {
        if weights.is_empty() {
            return Err(WeightLoadError::NoWeightSets);
        }
        let mut members = Vec::with_capacity(weights.len());
        for (index, path) in weights.iter().enumerate() {
            info!(index, total = weights.len(), path = %path.display(), "Loading weight set");
            let model = DeepFakeClassifier::load(path, &config_for(path), device)?;
            members.push(PoolMember::new(member_name(path), Box::new(model)));
        }
        info!(models = members.len(), "Model pool ready");
        Self::new(members)
    }

    /// Number of members (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; an empty pool cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names in pool order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(PoolMember::name)
    }

    /// Scores `input` with every member, in order, returning probabilities.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError`] if any member fails or yields a non-finite
    /// logit. No partial result is returned.
    pub fn probabilities(&self, input: &Tensor) -> Result<Vec<f32>, InferenceError> {
        self.members
            .iter()
            .map(|member| {
                let logit = member
                    .scorer
                    .score(input)
                    .map_err(|e| InferenceError::from_source(&member.name, &e))?;
                if !logit.is_finite() {
                    return Err(InferenceError::new(format!(
                        "{}: non-finite logit {logit}",
                        member.name
                    )));
                }
                let probability = sigmoid(logit);
                debug!(model = %member.name, logit, probability, "Scored frame");
                Ok(probability)
            })
            .collect()
    }

    /// Scores `input` and aggregates the per-model probabilities.
    ///
    /// # Errors
    ///
    /// See [`ModelPool::probabilities`].
    pub fn analyze(&self, input: &Tensor) -> Result<FrameAnalysis, InferenceError> {
        let probabilities = self.probabilities(input)?;
        let mean = mean_probability(&probabilities)
            .ok_or_else(|| InferenceError::new("model pool produced no scores"))?;
        Ok(FrameAnalysis::new(mean, probabilities))
    }
}

fn member_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}
