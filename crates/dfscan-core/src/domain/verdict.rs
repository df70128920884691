//! Categorical verdict derived from an aggregate probability.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Decision threshold applied to the aggregate probability.
///
/// Probabilities strictly above this value are reported as `High`.
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Binary deepfake verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Aggregate probability above the decision threshold.
    High,
    /// Aggregate probability at or below the decision threshold.
    Low,
}

impl Verdict {
    /// Classifies an aggregate probability against [`DECISION_THRESHOLD`].
    #[must_use]
    pub fn from_probability(probability: f32) -> Self {
        if probability > DECISION_THRESHOLD {
            Self::High
        } else {
            Self::Low
        }
    }

    /// Human-readable label returned to clients.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "high deepfake probability",
            Self::Low => "low deepfake probability",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
