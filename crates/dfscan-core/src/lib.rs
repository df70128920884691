//! dfscan Core - Domain logic and ensemble inference
//!
//! This crate contains the domain types, ports, error taxonomy, the candle
//! implementation of the DFDC frame classifier, and the pipeline that scores a
//! frame with every model in the pool and averages the result.

pub mod domain;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod ports;

pub use domain::{
    FrameAnalysis, FrameDimensions, FrameInfo, FrameReport, Verdict, DECISION_THRESHOLD,
};
pub use error::{AnalyzeError, DecodeError, InferenceError, WeightLoadError};
pub use inference::{
    select_device, DeepFakeClassifier, DevicePreference, EfficientNetConfig, EncoderKind,
};
pub use pipeline::{FrameAnalyzer, ModelPool, PoolMember, Preprocessor, DEFAULT_INPUT_SIZE};
pub use ports::{FrameScorer, FrameSource, ProgressEvent, ProgressSink, ResultOutput};
