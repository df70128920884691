//! Frame analysis pipeline: preprocess, fan out to the pool, aggregate.

mod analyzer;
mod pool;
mod preprocess;

pub use analyzer::FrameAnalyzer;
pub use pool::{ModelPool, PoolMember};
pub use preprocess::{Preprocessor, DEFAULT_INPUT_SIZE};
