//! Configuration file support for dfscan.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/dfscan/config.toml` (lowest priority)
//! - Project-local: `.dfscan.toml` (searched up directory tree)
//! - Environment and CLI flags (highest priority, applied separately)

use std::path::{Path, PathBuf};

use dfscan_core::{DevicePreference, EncoderKind};
use serde::Deserialize;
use tracing::{debug, info};

/// Name of the project-local config file.
const PROJECT_CONFIG: &str = ".dfscan.toml";

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General options.
    pub general: GeneralConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Weight sets and architecture.
    pub models: ModelsConfig,
    /// Compute device.
    pub device: DeviceConfig,
    /// Output formatting settings.
    pub output: OutputConfig,
}

/// General configuration options.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Recurse into subdirectories by default.
    pub recursive: Option<bool>,
}

/// HTTP server configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: Option<String>,
    /// Origin admitted by CORS.
    pub allowed_origin: Option<String>,
    /// Upload size ceiling in bytes.
    pub max_upload_bytes: Option<usize>,
}

/// Model configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Weight-set files, in ensemble order.
    pub weights: Option<Vec<PathBuf>>,
    /// Custom weights directory path.
    pub dir: Option<PathBuf>,
    /// Encoder variant (`b3`, `b5`, `b6`, `b7`).
    pub encoder: Option<String>,
    /// Square input resolution.
    pub input_size: Option<u32>,
    /// Custom width multiplier, overriding `encoder`.
    pub width_multiplier: Option<f64>,
    /// Custom depth multiplier, overriding `encoder`.
    pub depth_multiplier: Option<f64>,
}

/// Device configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `auto`, `cpu`, `cuda` or `metal`.
    pub preference: Option<DevicePreference>,
}

/// Output formatting configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "json" or "jsonl".
    pub format: Option<String>,
    /// Pretty-print JSON output.
    pub pretty: Option<bool>,
    /// Show progress bar.
    pub progress: Option<bool>,
}

impl AppConfig {
    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. XDG config: `~/.config/dfscan/config.toml`
    /// 2. Project-local: `.dfscan.toml` (searched up from cwd)
    ///
    /// Missing files are silently ignored. Invalid values are logged as warnings.
    pub fn load() -> Self {
        let cwd = std::env::current_dir().ok();
        Self::load_from(xdg_config_path().as_deref(), cwd.as_deref())
    }

    /// Loads from an explicit XDG path and project search root.
    fn load_from(xdg_path: Option<&Path>, search_root: Option<&Path>) -> Self {
        let mut config = Self::default();

        if let Some(xdg_path) = xdg_path {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = search_root.and_then(find_config_in_parents) {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        if let Err(e) = config.validate() {
            eprintln!("warning: {e}");
        }

        config
    }

    /// Validate configuration values are within acceptable ranges.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref encoder) = self.models.encoder {
            encoder
                .parse::<EncoderKind>()
                .map_err(|e| format!("models.encoder: {e}"))?;
        }
        if let Some(size) = self.models.input_size {
            if size == 0 {
                return Err("models.input_size must be positive, got 0".to_string());
            }
        }
        match (self.models.width_multiplier, self.models.depth_multiplier) {
            (Some(w), Some(d)) => {
                if w <= 0.0 || d <= 0.0 {
                    return Err(format!(
                        "models.width_multiplier and models.depth_multiplier must be positive, got {w} and {d}"
                    ));
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(
                    "models.width_multiplier and models.depth_multiplier must be set together"
                        .to_string(),
                );
            }
            (None, None) => {}
        }
        if self.server.max_upload_bytes == Some(0) {
            return Err("server.max_upload_bytes must be positive, got 0".to_string());
        }
        if let Some(ref bind) = self.server.bind {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return Err(format!("server.bind must be a socket address, got '{bind}'"));
            }
        }

        if let Some(ref f) = self.output.format {
            if f != "json" && f != "jsonl" {
                return Err(format!(
                    "output.format must be 'json' or 'jsonl', got '{f}'"
                ));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        // General
        self.general.recursive = other.general.recursive.or(self.general.recursive);

        // Server
        self.server.bind = other.server.bind.or_else(|| self.server.bind.take());
        self.server.allowed_origin = other
            .server
            .allowed_origin
            .or_else(|| self.server.allowed_origin.take());
        self.server.max_upload_bytes = other
            .server
            .max_upload_bytes
            .or(self.server.max_upload_bytes);

        // Models
        self.models.weights = other.models.weights.or_else(|| self.models.weights.take());
        self.models.dir = other.models.dir.or_else(|| self.models.dir.take());
        self.models.encoder = other.models.encoder.or_else(|| self.models.encoder.take());
        self.models.input_size = other.models.input_size.or(self.models.input_size);
        self.models.width_multiplier = other
            .models
            .width_multiplier
            .or(self.models.width_multiplier);
        self.models.depth_multiplier = other
            .models
            .depth_multiplier
            .or(self.models.depth_multiplier);

        // Device
        self.device.preference = other.device.preference.or(self.device.preference);

        // Output
        self.output.format = other.output.format.or_else(|| self.output.format.take());
        self.output.pretty = other.output.pretty.or(self.output.pretty);
        self.output.progress = other.output.progress.or(self.output.progress);
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dfscan").join("config.toml"))
}

/// Search for `.dfscan.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(PROJECT_CONFIG);
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}
