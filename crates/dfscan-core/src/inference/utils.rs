//! Shared inference utilities.

/// Sigmoid activation function.
#[inline]
#[must_use]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Arithmetic mean of per-model probabilities, clamped to `[0, 1]`.
///
/// Accumulates in `f64` in the given order, so a single value is returned
/// unchanged. Returns `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn mean_probability(probabilities: &[f32]) -> Option<f32> {
    if probabilities.is_empty() {
        return None;
    }
    let sum: f64 = probabilities.iter().map(|&p| f64::from(p)).sum();
    let mean = (sum / probabilities.len() as f64) as f32;
    Some(mean.clamp(0.0, 1.0))
}
