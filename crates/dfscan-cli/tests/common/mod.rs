//! Shared setup for CLI integration tests.

#![allow(dead_code, clippy::unwrap_used, deprecated)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use dfscan_test_support::{SyntheticFrameBuilder, TinyWeights};
use tempfile::TempDir;

/// Project config selecting the tiny test architecture on the CPU.
pub fn tiny_config() -> String {
    format!(
        "[models]\nwidth_multiplier = {}\ndepth_multiplier = {}\ninput_size = {}\n\n[device]\npreference = 'cpu'\n",
        TinyWeights::WIDTH,
        TinyWeights::DEPTH,
        TinyWeights::INPUT_SIZE
    )
}

/// A scratch project: its own cwd, an isolated XDG config home, tiny
/// weights and a project config pointing at them.
pub struct Workspace {
    pub root: TempDir,
    pub xdg: TempDir,
}

impl Workspace {
    /// Empty workspace with no config files.
    pub fn empty() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            xdg: tempfile::tempdir().unwrap(),
        }
    }

    /// Workspace with tiny weights saved as `tiny.safetensors` and a
    /// project config selecting the tiny architecture.
    pub fn with_tiny_weights() -> Self {
        let ws = Self::empty();
        TinyWeights::generate()
            .unwrap()
            .save(ws.path().join("tiny.safetensors"))
            .unwrap();
        ws.write_project_config(&tiny_config());
        ws
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn weights(&self) -> PathBuf {
        self.path().join("tiny.safetensors")
    }

    pub fn write_project_config(&self, content: &str) {
        fs::write(self.path().join(".dfscan.toml"), content).unwrap();
    }

    pub fn write_xdg_config(&self, content: &str) {
        let dir = self.xdg.path().join("dfscan");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), content).unwrap();
    }

    /// Writes a solid-color PNG frame and returns its path.
    pub fn frame(&self, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, SyntheticFrameBuilder::png_bytes(48, 36, rgb)).unwrap();
        path
    }

    /// `dfscan` running inside this workspace, isolated from the host's
    /// config and environment.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("dfscan").unwrap();
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.xdg.path())
            .env_remove("DFSCAN_WEIGHTS")
            .env_remove("DFSCAN_DEVICE")
            .env_remove("DFSCAN_BIND")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// Parses JSONL stdout into values.
pub fn jsonl(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
