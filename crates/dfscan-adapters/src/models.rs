//! DFDC checkpoint registry, weights directory and downloading.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Release the DFDC winning-solution checkpoints are published under.
pub const RELEASE_BASE_URL: &str =
    "https://github.com/selimsef/dfdc_deepfake_challenge/releases/download/0.0.1/";

/// Callback invoked while downloading: `(file name, bytes so far, total bytes)`.
pub type ProgressCallback = Box<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// Chunk size for streaming downloads to disk.
const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// A known pretrained weight set.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// File name, also the release asset name.
    pub filename: &'static str,
    /// Expected SHA256 hash, if known. `None` skips verification.
    pub sha256: Option<&'static str>,
}

impl CheckpointInfo {
    /// Download URL of this checkpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{RELEASE_BASE_URL}{}", self.filename)
    }

    /// Short identifier (`111_0_36`, ...) used on the command line.
    #[must_use]
    pub fn short_name(&self) -> String {
        let seed = self
            .filename
            .strip_prefix("final_")
            .and_then(|rest| rest.split('_').next())
            .unwrap_or(self.filename);
        let epoch: Vec<&str> = self.filename.rsplitn(3, '_').take(2).collect();
        match epoch.as_slice() {
            [minor, major] => format!("{seed}_{major}_{minor}"),
            _ => seed.to_string(),
        }
    }
}

/// The six `tf_efficientnet_b7_ns` checkpoints of the DFDC ensemble, in
/// ensemble order.
pub const DFDC_CHECKPOINTS: &[CheckpointInfo] = &[
    CheckpointInfo {
        filename: "final_111_DeepFakeClassifier_tf_efficientnet_b7_ns_0_36",
        sha256: None,
    },
    CheckpointInfo {
        filename: "final_555_DeepFakeClassifier_tf_efficientnet_b7_ns_0_19",
        sha256: None,
    },
    CheckpointInfo {
        filename: "final_777_DeepFakeClassifier_tf_efficientnet_b7_ns_0_29",
        sha256: None,
    },
    CheckpointInfo {
        filename: "final_777_DeepFakeClassifier_tf_efficientnet_b7_ns_0_31",
        sha256: None,
    },
    CheckpointInfo {
        filename: "final_888_DeepFakeClassifier_tf_efficientnet_b7_ns_0_37",
        sha256: None,
    },
    CheckpointInfo {
        filename: "final_999_DeepFakeClassifier_tf_efficientnet_b7_ns_0_23",
        sha256: None,
    },
];

/// Returns the default weights directory.
///
/// Uses `XDG_DATA_HOME/dfscan/weights` or `~/.local/share/dfscan/weights`.
#[must_use]
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dfscan")
        .join("weights")
}

/// Finds a checkpoint by file name or short name.
#[must_use]
pub fn find_checkpoint(name: &str) -> Option<&'static CheckpointInfo> {
    DFDC_CHECKPOINTS
        .iter()
        .find(|c| c.filename == name || c.short_name() == name)
}

/// Lists the registry with the installed state of each checkpoint in `dir`.
#[must_use]
pub fn list_checkpoints(dir: &Path) -> Vec<(&'static CheckpointInfo, bool)> {
    DFDC_CHECKPOINTS
        .iter()
        .map(|c| (c, dir.join(c.filename).is_file()))
        .collect()
}

/// Paths of the registered checkpoints present in `dir`, in ensemble order.
#[must_use]
pub fn installed_weights(dir: &Path) -> Vec<PathBuf> {
    DFDC_CHECKPOINTS
        .iter()
        .map(|c| dir.join(c.filename))
        .filter(|p| p.is_file())
        .collect()
}

/// Downloads the given checkpoints into `dir`, skipping those already present.
///
/// # Errors
///
/// Returns an error if:
/// - The weights directory cannot be created
/// - A download fails
/// - A checkpoint's checksum doesn't match
pub fn fetch_checkpoints(
    dir: &Path,
    checkpoints: &[&CheckpointInfo],
    force: bool,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create weights directory: {}", dir.display()))?;

    let mut paths = Vec::with_capacity(checkpoints.len());
    for checkpoint in checkpoints {
        let path = dir.join(checkpoint.filename);
        if path.is_file() && !force {
            debug!("Checkpoint {} already exists", checkpoint.filename);
        } else {
            download_checkpoint(checkpoint, &path, progress)?;
        }
        paths.push(path);
    }
    Ok(paths)
}

/// Downloads one checkpoint, streaming to a temporary file then renaming.
fn download_checkpoint(
    checkpoint: &CheckpointInfo,
    path: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    let url = checkpoint.url();
    info!("Downloading checkpoint: {}", checkpoint.filename);

    let mut response = reqwest::blocking::Client::builder()
        .timeout(None::<std::time::Duration>)
        .build()
        .context("Failed to build HTTP client")?
        .get(&url)
        .send()
        .with_context(|| format!("Failed to download {}", checkpoint.filename))?;

    if !response.status().is_success() {
        anyhow::bail!("Download of {url} failed with status: {}", response.status());
    }
    let total = response.content_length();

    let written = save_stream(checkpoint, &mut response, path, total, progress)?;
    info!("Downloaded {} ({written} bytes)", checkpoint.filename);
    Ok(())
}

/// Streams `reader` into `path` through a `.part` file.
///
/// The partial file is removed on any failure, so `path` only ever holds a
/// complete, verified checkpoint.
fn save_stream(
    checkpoint: &CheckpointInfo,
    reader: &mut impl Read,
    path: &Path,
    total: Option<u64>,
    progress: Option<&ProgressCallback>,
) -> Result<u64> {
    let partial = path.with_extension("part");
    let result = write_partial(checkpoint, reader, &partial, total, progress)
        .and_then(|(written, hash)| {
            verify_checksum(checkpoint, &hash).map_err(|e| {
                e.context(format!(
                    "Try deleting {} and re-running to download a fresh copy",
                    path.display()
                ))
            })?;
            fs::rename(&partial, path).with_context(|| {
                format!("Failed to move download into place: {}", path.display())
            })?;
            Ok(written)
        });

    if result.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            warn!("Failed to remove {}: {e}", partial.display());
        }
    }
    result
}

/// Copies `reader` into `partial`, returning the byte count and SHA256.
fn write_partial(
    checkpoint: &CheckpointInfo,
    reader: &mut impl Read,
    partial: &Path,
    total: Option<u64>,
    progress: Option<&ProgressCallback>,
) -> Result<(u64, String)> {
    let mut file = fs::File::create(partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    let mut written = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read response for {}", checkpoint.filename))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        written += n as u64;
        if let Some(cb) = progress {
            cb(checkpoint.filename, written, total);
        }
    }
    file.flush()
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    Ok((written, format!("{:x}", hasher.finalize())))
}

fn verify_checksum(checkpoint: &CheckpointInfo, actual: &str) -> Result<()> {
    match checkpoint.sha256 {
        None => {
            warn!(
                "No published checksum for {}; skipping verification (sha256 {actual})",
                checkpoint.filename
            );
            Ok(())
        }
        Some(expected) if expected.eq_ignore_ascii_case(actual) => Ok(()),
        Some(expected) => anyhow::bail!(
            "Checksum mismatch for {}: expected {expected}, got {actual}",
            checkpoint.filename
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_dir() {
        let dir = models_dir();
        assert!(dir.ends_with("dfscan/weights"));
    }

    #[test]
    fn test_registry_is_the_b7_ensemble() {
        assert_eq!(DFDC_CHECKPOINTS.len(), 6);
        assert!(DFDC_CHECKPOINTS
            .iter()
            .all(|c| c.filename.contains("tf_efficientnet_b7_ns")));
    }

    #[test]
    fn test_url() {
        let url = DFDC_CHECKPOINTS[0].url();
        assert_eq!(
            url,
            "https://github.com/selimsef/dfdc_deepfake_challenge/releases/download/0.0.1/final_111_DeepFakeClassifier_tf_efficientnet_b7_ns_0_36"
        );
    }

    #[test]
    fn test_short_names_are_unique() {
        let names: Vec<String> = DFDC_CHECKPOINTS.iter().map(CheckpointInfo::short_name).collect();
        assert_eq!(names[0], "111_0_36");
        assert_eq!(names[3], "777_0_31");
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
    }

    #[test]
    fn test_find_checkpoint() {
        assert!(find_checkpoint("999_0_23").is_some());
        assert!(find_checkpoint("final_555_DeepFakeClassifier_tf_efficientnet_b7_ns_0_19").is_some());
        assert!(find_checkpoint("unknown").is_none());
    }

    #[test]
    fn test_installed_weights_in_order() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        for c in [&DFDC_CHECKPOINTS[4], &DFDC_CHECKPOINTS[1]] {
            fs::write(dir.path().join(c.filename), b"x").unwrap_or_else(|e| panic!("{e}"));
        }
        let found = installed_weights(dir.path());
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with(DFDC_CHECKPOINTS[1].filename));
        assert!(found[1].ends_with(DFDC_CHECKPOINTS[4].filename));

        let listed = list_checkpoints(dir.path());
        assert_eq!(listed.iter().filter(|(_, present)| *present).count(), 2);
    }

    #[test]
    fn test_checksum_verification() {
        let mut c = DFDC_CHECKPOINTS[0].clone();
        assert!(verify_checksum(&c, "abc").is_ok());
        c.sha256 = Some("ABC");
        assert!(verify_checksum(&c, "abc").is_ok());
        c.sha256 = Some("def");
        assert!(verify_checksum(&c, "abc").is_err());
    }

    /// Yields `good` bytes, then fails like a dropped connection.
    struct BrokenStream {
        good: usize,
    }

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.good == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            let n = self.good.min(buf.len());
            buf[..n].fill(7);
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_save_stream_renames_complete_download() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let checkpoint = &DFDC_CHECKPOINTS[0];
        let path = dir.path().join(checkpoint.filename);

        let mut body: &[u8] = b"checkpoint bytes";
        let written = save_stream(checkpoint, &mut body, &path, None, None)
            .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(written, 16);
        assert!(path.is_file());
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn test_failed_stream_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let checkpoint = &DFDC_CHECKPOINTS[0];
        let path = dir.path().join(checkpoint.filename);

        let mut stream = BrokenStream { good: 100_000 };
        let err = save_stream(checkpoint, &mut stream, &path, Some(200_000), None)
            .err()
            .unwrap_or_else(|| panic!("broken stream should fail"));

        assert!(format!("{err:#}").contains("connection reset"));
        assert!(!path.exists());
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn test_checksum_mismatch_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let mut checkpoint = DFDC_CHECKPOINTS[0].clone();
        checkpoint.sha256 = Some("0000");
        let path = dir.path().join(checkpoint.filename);

        let mut body: &[u8] = b"tampered";
        assert!(save_stream(&checkpoint, &mut body, &path, None, None).is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("part").exists());
    }
}
