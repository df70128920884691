//! Core domain types for frame analysis.

mod result;
mod verdict;

pub use result::{FrameAnalysis, FrameDimensions, FrameInfo, FrameReport};
pub use verdict::{Verdict, DECISION_THRESHOLD};
