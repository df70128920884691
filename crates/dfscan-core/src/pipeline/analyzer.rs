//! The process-wide analysis context shared by every request.

use image::DynamicImage;
use tracing::debug;

use super::{ModelPool, Preprocessor};
use crate::domain::FrameAnalysis;
use crate::error::{AnalyzeError, InferenceError};

/// Immutable pairing of a model pool with its preprocessing.
///
/// Built once at startup and shared read-only (typically behind an `Arc`);
/// analysis takes `&self` and holds no locks.
#[derive(Debug)]
pub struct FrameAnalyzer {
    pool: ModelPool,
    preprocessor: Preprocessor,
}

impl FrameAnalyzer {
    /// Creates an analyzer from a loaded pool.
    #[must_use]
    pub const fn new(pool: ModelPool, preprocessor: Preprocessor) -> Self {
        Self { pool, preprocessor }
    }

    /// The model pool.
    #[must_use]
    pub const fn pool(&self) -> &ModelPool {
        &self.pool
    }

    /// The preprocessing stage.
    #[must_use]
    pub const fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Decodes and scores an encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzeError::Decode`] for undecodable bytes and
    /// [`AnalyzeError::Inference`] if scoring fails.
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<FrameAnalysis, AnalyzeError> {
        let image = Preprocessor::decode(bytes)?;
        debug!(
            bytes = bytes.len(),
            width = image.width(),
            height = image.height(),
            "Decoded frame"
        );
        Ok(self.analyze_image(&image)?)
    }

    /// Scores an already decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError`] if tensor construction or scoring fails.
    pub fn analyze_image(&self, image: &DynamicImage) -> Result<FrameAnalysis, InferenceError> {
        let input = self.preprocessor.to_tensor(image)?;
        self.pool.analyze(&input)
    }
}
