//! dfscan Adapters - External adapters for dfscan.
//!
//! This crate provides adapters for:
//! - The HTTP frame-analysis service (axum)
//! - Filesystem frame source
//! - DFDC checkpoint registry and downloading
//! - Timestamps

pub mod clock;
pub mod fs;
pub mod http;
pub mod models;

pub use clock::iso_timestamp;
pub use fs::FsFrameSource;
pub use http::{router, serve, HttpConfig};
pub use models::{installed_weights, models_dir};
