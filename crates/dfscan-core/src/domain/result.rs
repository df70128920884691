//! Frame and analysis result types.

use serde::{Deserialize, Serialize};

use super::Verdict;

/// Aggregate outcome of scoring one frame through the model pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    /// Mean of the per-model probabilities, in `[0, 1]`.
    pub deepfake_probability: f32,
    /// Verdict derived from `deepfake_probability`.
    pub verdict: Verdict,
    /// Sigmoid output of each pool member, in pool order.
    pub model_probabilities: Vec<f32>,
}

impl FrameAnalysis {
    /// Builds an analysis from the aggregate and per-model probabilities.
    #[must_use]
    pub fn new(deepfake_probability: f32, model_probabilities: Vec<f32>) -> Self {
        Self {
            deepfake_probability,
            verdict: Verdict::from_probability(deepfake_probability),
            model_probabilities,
        }
    }

    /// Number of models that contributed to this analysis.
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.model_probabilities.len()
    }
}

/// Analysis of one frame read from disk, as reported by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    /// Path to the analyzed frame.
    pub path: String,
    /// Timestamp of analysis (ISO 8601).
    pub timestamp: String,
    /// Original frame dimensions, before resizing.
    pub dimensions: FrameDimensions,
    /// Scoring outcome.
    #[serde(flatten)]
    pub analysis: FrameAnalysis,
}

/// Frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameDimensions {
    /// Creates new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A decoded frame with its origin.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Where the frame came from (file path or upload name).
    pub path: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Decoded image data.
    pub image: image::DynamicImage,
}

impl FrameInfo {
    /// Wraps a decoded image, recording its dimensions.
    #[must_use]
    pub fn new(path: impl Into<String>, image: image::DynamicImage) -> Self {
        Self {
            path: path.into(),
            width: image.width(),
            height: image.height(),
            image,
        }
    }

    /// Returns the frame dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.width, self.height)
    }
}
