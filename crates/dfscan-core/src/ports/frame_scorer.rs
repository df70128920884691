//! Scoring port: the capability every pool member provides.

use candle_core::Tensor;

/// A pretrained classifier reduced to its scoring contract.
///
/// Implementations receive a normalized `(1, 3, S, S)` tensor with values in
/// `[0, 1]` and return one unbounded logit. They must not mutate shared state,
/// so a single instance can serve concurrent requests.
pub trait FrameScorer: Send + Sync {
    /// Scores one normalized frame tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails (shape mismatch, device
    /// failure, out of memory).
    fn score(&self, input: &Tensor) -> anyhow::Result<f32>;
}

impl<T: FrameScorer + ?Sized> FrameScorer for Box<T> {
    fn score(&self, input: &Tensor) -> anyhow::Result<f32> {
        (**self).score(input)
    }
}

impl<T: FrameScorer + ?Sized> FrameScorer for std::sync::Arc<T> {
    fn score(&self, input: &Tensor) -> anyhow::Result<f32> {
        (**self).score(input)
    }
}
