//! Test support utilities for dfscan.
//!
//! Provides mock scorers and port implementations, synthetic frame builders,
//! and a generator for tiny classifier weight sets that bind strictly to the
//! real architecture.
//!
//! # Example
//!
//! ```
//! use dfscan_core::ModelPool;
//! use dfscan_test_support::{MockScorer, SyntheticFrameBuilder};
//!
//! // A pool that always answers 0.8
//! let pool = ModelPool::from_scorers(vec![Box::new(MockScorer::from_probability(0.8))]);
//! assert!(pool.is_ok());
//!
//! // An encoded frame for an upload
//! let png = SyntheticFrameBuilder::png_bytes(64, 48, [0, 0, 0]);
//! assert!(!png.is_empty());
//! ```

mod builders;
mod mocks;
mod weights;

pub use builders::SyntheticFrameBuilder;
pub use mocks::{
    FailingScorer, MockFrameSource, MockProgressSink, MockResultOutput, MockScorer,
    RecordingScorer,
};
pub use weights::TinyWeights;
