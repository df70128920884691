//! CLI command definitions and handlers.

pub mod models;
pub mod score;
pub mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dfscan_adapters::{installed_weights, models_dir};
use dfscan_core::{
    select_device, DevicePreference, EfficientNetConfig, EncoderKind, FrameAnalyzer, ModelPool,
    Preprocessor, WeightLoadError, DEFAULT_INPUT_SIZE,
};
use tracing::{debug, info};

use crate::config::AppConfig;

/// dfscan - Deepfake frame classifier
#[derive(Parser)]
#[command(name = "dfscan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server arguments used when no subcommand is given.
    #[command(flatten)]
    pub serve: serve::ServeArgs,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the frame classifier over HTTP (default)
    Serve(serve::ServeArgs),
    /// Score image files with the model pool
    Score(score::ScoreArgs),
    /// Manage DFDC weight sets
    Models(models::ModelsArgs),
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Completed; no frame was judged a deepfake.
    Success,
    /// At least one scored frame has a high deepfake probability.
    DeepfakeFound,
    /// Configuration, startup or I/O failure.
    Error,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => Self::SUCCESS,
            ExitCode::DeepfakeFound => Self::from(1),
            ExitCode::Error => Self::from(2),
        }
    }
}

/// Arguments selecting and loading the model pool.
#[derive(Args, Clone, Default)]
pub struct ModelArgs {
    /// Weight-set files, in ensemble order
    #[arg(
        short,
        long = "weights",
        value_name = "PATH",
        env = "DFSCAN_WEIGHTS",
        value_delimiter = ','
    )]
    pub weights: Vec<PathBuf>,

    /// Encoder variant for weight sets whose file name does not name one
    #[arg(long, value_name = "ENCODER")]
    pub encoder: Option<EncoderKind>,

    /// Compute device: auto, cpu, cuda or metal
    #[arg(long, value_name = "DEVICE", env = "DFSCAN_DEVICE")]
    pub device: Option<DevicePreference>,

    /// Square input resolution the weights were trained at
    #[arg(long, value_name = "PIXELS", value_parser = clap::value_parser!(u32).range(1..))]
    pub input_size: Option<u32>,

    /// Weights directory searched when no weight set is given
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Custom width/depth multipliers from config (not a CLI flag).
    #[arg(skip)]
    multipliers: Option<(f64, f64)>,
}

impl ModelArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. Environment and CLI arguments (already set on self)
    pub fn with_config(mut args: Self, config: &AppConfig) -> Self {
        if args.weights.is_empty() {
            if let Some(ref weights) = config.models.weights {
                args.weights.clone_from(weights);
            }
        }

        // An explicit --encoder beats custom multipliers from config
        if args.encoder.is_none() {
            args.encoder = config
                .models
                .encoder
                .as_deref()
                .and_then(|s| s.parse().ok());
            if let (Some(w), Some(d)) = (
                config.models.width_multiplier,
                config.models.depth_multiplier,
            ) {
                if w > 0.0 && d > 0.0 {
                    args.multipliers = Some((w, d));
                }
            }
        }

        args.device = args.device.or(config.device.preference);
        args.input_size = args
            .input_size
            .or_else(|| config.models.input_size.filter(|&s| s > 0));

        if args.models_dir.is_none() {
            args.models_dir.clone_from(&config.models.dir);
        }

        args
    }

    /// Weights directory with fallback to the platform default.
    pub fn models_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(models_dir)
    }

    /// Input resolution with fallback to the trained DFDC resolution.
    fn input_size(&self) -> u32 {
        self.input_size.unwrap_or(DEFAULT_INPUT_SIZE)
    }

    /// Explicit weight sets, or the DFDC checkpoints installed in the
    /// weights directory.
    fn resolve_weights(&self) -> Vec<PathBuf> {
        if !self.weights.is_empty() {
            return self.weights.clone();
        }
        let dir = self.models_dir();
        let found = installed_weights(&dir);
        debug!(
            "Found {} installed checkpoint(s) in {}",
            found.len(),
            dir.display()
        );
        found
    }

    /// Loads every weight set and assembles the analyzer.
    ///
    /// # Errors
    ///
    /// Returns an error if no weight set is configured, the device is
    /// unavailable, or any weight set fails to load.
    pub fn build_analyzer(&self) -> Result<FrameAnalyzer> {
        let weights = self.resolve_weights();
        if weights.is_empty() {
            return Err(anyhow::Error::new(WeightLoadError::NoWeightSets).context(format!(
                "No weight sets given and none installed in {}. Pass --weights or run `dfscan models fetch`",
                self.models_dir().display()
            )));
        }

        let preference = self.device.unwrap_or_default();
        let device = select_device(preference)
            .with_context(|| format!("Failed to select device '{preference}'"))?;

        let pool = match self.multipliers {
            Some((width, depth)) => {
                info!(width, depth, "Using custom encoder multipliers");
                let config = EfficientNetConfig::with_multipliers(width, depth);
                ModelPool::load_with_config(&weights, &config, &device)
            }
            None => ModelPool::load(&weights, self.encoder.unwrap_or_default(), &device),
        }
        .context("Failed to load model pool")?;

        let names: Vec<&str> = pool.names().collect();
        info!(models = ?names, input_size = self.input_size(), "Analyzer ready");
        Ok(FrameAnalyzer::new(
            pool,
            Preprocessor::new(self.input_size(), device),
        ))
    }
}
