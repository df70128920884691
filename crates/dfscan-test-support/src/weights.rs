//! Tiny classifier weight sets with the real parameter layout.
//!
//! The network has every module of the DFDC classifier (stem, seven stages,
//! head, ImageNet head, `fc`) but at a fraction of the width and depth, so a
//! weight set is a few hundred kilobytes and scores a 32x32 frame instantly.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use dfscan_core::inference::{DeepFakeClassifier, EfficientNetConfig, WRAPPER_PREFIX};

/// A randomly initialized tiny classifier, held as named tensors.
#[derive(Debug, Clone)]
pub struct TinyWeights {
    tensors: HashMap<String, Tensor>,
}

impl TinyWeights {
    /// Width multiplier of the tiny network.
    pub const WIDTH: f64 = 0.25;
    /// Depth multiplier of the tiny network (one block per stage).
    pub const DEPTH: f64 = 0.1;
    /// Input side length the tiny network is exercised at.
    pub const INPUT_SIZE: u32 = 32;

    /// Architecture the tiny weights bind to.
    #[must_use]
    pub const fn config() -> EfficientNetConfig {
        EfficientNetConfig::with_multipliers(Self::WIDTH, Self::DEPTH)
    }

    /// Generates a fresh random weight set.
    ///
    /// # Errors
    ///
    /// Returns an error if the classifier cannot be instantiated.
    pub fn generate() -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DeepFakeClassifier::new(&Self::config(), vb).context("Failed to build tiny classifier")?;

        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
        let tensors = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        Ok(Self { tensors })
    }

    /// Parameter names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Mutable access to the tensors, for building broken weight sets.
    pub fn tensors_mut(&mut self) -> &mut HashMap<String, Tensor> {
        &mut self.tensors
    }

    /// Adds a `num_batches_tracked` counter next to every batch norm.
    ///
    /// # Errors
    ///
    /// Returns an error if a scalar tensor cannot be created.
    pub fn with_batch_counters(mut self) -> Result<Self> {
        let norms: Vec<String> = self
            .tensors
            .keys()
            .filter_map(|k| k.strip_suffix(".running_mean").map(str::to_string))
            .collect();
        for norm in norms {
            let counter = Tensor::new(1000i64, &Device::Cpu)?;
            self.tensors.insert(format!("{norm}.num_batches_tracked"), counter);
        }
        Ok(self)
    }

    /// Writes the weight set as safetensors.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        candle_core::safetensors::save(&self.tensors, path.as_ref())
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))
    }

    /// Writes the weight set with every key wrapped in `module.`, as a
    /// `DataParallel` export would.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_prefixed(&self, path: impl AsRef<Path>) -> Result<()> {
        let wrapped: HashMap<String, Tensor> = self
            .tensors
            .iter()
            .map(|(k, v)| (format!("{WRAPPER_PREFIX}{k}"), v.clone()))
            .collect();
        candle_core::safetensors::save(&wrapped, path.as_ref())
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_layout() {
        let weights = TinyWeights::generate().unwrap();
        let names = weights.names();
        for key in [
            "encoder.conv_stem.weight",
            "encoder.bn1.running_var",
            "encoder.blocks.0.0.conv_dw.weight",
            "encoder.blocks.0.0.se.conv_reduce.bias",
            "encoder.blocks.6.0.conv_pwl.weight",
            "encoder.conv_head.weight",
            "encoder.classifier.weight",
            "fc.weight",
            "fc.bias",
        ] {
            assert!(names.iter().any(|n| n == key), "missing {key}");
        }
    }

    #[test]
    fn test_batch_counters_added() {
        let weights = TinyWeights::generate().unwrap().with_batch_counters().unwrap();
        assert!(weights
            .names()
            .iter()
            .any(|n| n == "encoder.bn2.num_batches_tracked"));
    }
}
