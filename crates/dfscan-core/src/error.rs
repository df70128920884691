//! Error taxonomy for loading weight sets and analyzing frames.
//!
//! Startup failures (`WeightLoadError`) are fatal to the process. Per-frame
//! failures (`AnalyzeError`) are confined to the request that produced them.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to bind a weight set to the classifier architecture.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WeightLoadError {
    /// No weight-set locators were configured.
    #[error("no weight sets configured; at least one is required")]
    NoWeightSets,

    /// The weight-set file does not exist.
    #[error("weight set not found: {}", path.display())]
    Missing {
        /// Locator that was requested.
        path: PathBuf,
    },

    /// The file exists but could not be read or parsed as a weight container.
    #[error("failed to read weight set {}: {reason}", path.display())]
    Unreadable {
        /// Locator that was requested.
        path: PathBuf,
        /// Underlying read or parse failure.
        reason: String,
    },

    /// The parameters do not fit the architecture.
    #[error("weight set {} does not match the architecture: {reason}", path.display())]
    Incompatible {
        /// Locator that was requested.
        path: PathBuf,
        /// Missing, unexpected, or mis-shaped parameters.
        reason: String,
    },
}

/// Uploaded bytes are not a decodable image.
#[derive(Debug, Error)]
#[error("failed to decode image: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// Tensor construction or scoring failed for one frame.
#[derive(Debug, Error)]
#[error("inference failed: {message}")]
pub struct InferenceError {
    message: String,
}

impl InferenceError {
    /// Creates an inference error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wraps a lower-level error, keeping its full context chain.
    #[must_use]
    pub fn from_source(context: &str, source: &anyhow::Error) -> Self {
        Self::new(format!("{context}: {source:#}"))
    }
}

impl From<candle_core::Error> for InferenceError {
    fn from(e: candle_core::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Per-frame analysis failure.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The frame could not be decoded (client error).
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The frame could not be scored (server error).
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl AnalyzeError {
    /// Returns true if the failure was caused by the submitted data.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
