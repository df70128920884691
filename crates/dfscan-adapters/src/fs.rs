//! Filesystem adapter for loading frames.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dfscan_core::{FrameInfo, FrameSource};
use tracing::{debug, warn};

/// Supported frame extensions.
const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "gif"];

/// Filesystem frame source adapter.
pub struct FsFrameSource {
    paths: Vec<PathBuf>,
    recursive: bool,
}

impl FsFrameSource {
    /// Creates a new filesystem frame source.
    ///
    /// # Arguments
    ///
    /// * `paths` - Files or directories to scan
    /// * `recursive` - Whether to recurse into subdirectories
    #[must_use]
    pub const fn new(paths: Vec<PathBuf>, recursive: bool) -> Self {
        Self { paths, recursive }
    }

    /// Collects all frame files from the configured paths, sorted per directory.
    fn collect_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for path in &self.paths {
            if path.is_file() {
                if is_supported_frame(path) {
                    files.push(path.clone());
                } else {
                    warn!("Unsupported file type: {}", path.display());
                }
            } else if path.is_dir() {
                self.collect_from_dir(path, &mut files);
            } else {
                warn!("Path does not exist: {}", path.display());
            }
        }

        files
    }

    fn collect_from_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read directory {}: {e}", dir.display());
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();

        for path in paths {
            if path.is_file() && is_supported_frame(&path) {
                files.push(path);
            } else if path.is_dir() && self.recursive {
                self.collect_from_dir(&path, files);
            }
        }
    }
}

impl FrameSource for FsFrameSource {
    fn frames(&self) -> Box<dyn Iterator<Item = Result<FrameInfo>> + Send + '_> {
        let files = self.collect_files();
        debug!("Found {} frame files", files.len());

        Box::new(files.into_iter().map(|path| load_frame(&path)))
    }

    fn count_hint(&self) -> Option<usize> {
        Some(self.collect_files().len())
    }
}

/// Checks if a path has a supported frame extension.
fn is_supported_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.as_str()))
}

/// Loads and decodes a frame from the filesystem.
///
/// The container is sniffed from the content, so a misnamed file still loads.
fn load_frame(path: &Path) -> Result<FrameInfo> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read frame: {}", path.display()))?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode frame: {}", path.display()))?;

    Ok(FrameInfo::new(path.to_string_lossy(), image))
}
