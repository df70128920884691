//! Models command - manage DFDC weight sets.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Args, Subcommand};
use dfscan_adapters::models::{
    fetch_checkpoints, find_checkpoint, list_checkpoints, models_dir, CheckpointInfo,
    ProgressCallback, DFDC_CHECKPOINTS,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::AppConfig;

/// Arguments for the models command
#[derive(Args)]
pub struct ModelsArgs {
    /// Weights directory (overrides default and config)
    #[arg(long, value_name = "DIR", global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Models subcommands
#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Download DFDC checkpoints (all six unless named)
    Fetch {
        /// Checkpoints to download, by short name (`111_0_36`) or file name
        names: Vec<String>,

        /// Download again even when already present
        #[arg(long)]
        force: bool,
    },
    /// List known checkpoints and whether they are installed
    List,
    /// Print weights directory path
    Path,
}

/// Run the models command.
pub fn run(args: &ModelsArgs, config: &AppConfig) -> Result<()> {
    let dir = args
        .dir
        .clone()
        .or_else(|| config.models.dir.clone())
        .unwrap_or_else(models_dir);

    match &args.command {
        ModelsCommand::Fetch { names, force } => fetch_models(&dir, names, *force),
        ModelsCommand::List => {
            list_models(&dir);
            Ok(())
        }
        ModelsCommand::Path => {
            println!("{}", dir.display());
            Ok(())
        }
    }
}

/// Resolves checkpoint names against the registry; empty means all.
fn select_checkpoints(names: &[String]) -> Result<Vec<&'static CheckpointInfo>> {
    if names.is_empty() {
        return Ok(DFDC_CHECKPOINTS.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            find_checkpoint(name).ok_or_else(|| {
                let known: Vec<String> =
                    DFDC_CHECKPOINTS.iter().map(CheckpointInfo::short_name).collect();
                anyhow::anyhow!(
                    "Unknown checkpoint '{name}' (known: {})",
                    known.join(", ")
                )
            })
        })
        .collect()
}

fn fetch_models(dir: &std::path::Path, names: &[String], force: bool) -> Result<()> {
    let checkpoints = select_checkpoints(names)?;

    let pb = Arc::new(ProgressBar::new(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {e}"))?
            .progress_chars("#>-"),
    );

    let current: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let pb_clone = Arc::clone(&pb);
    let current_clone = Arc::clone(&current);

    let progress: ProgressCallback =
        Box::new(move |name: &str, downloaded: u64, total: Option<u64>| {
            let is_new = {
                let mut current = current_clone
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if *current == name {
                    false
                } else {
                    *current = name.to_string();
                    true
                }
            };
            if is_new {
                if let Some(t) = total {
                    pb_clone.set_length(t);
                }
                pb_clone.set_message(name.to_string());
            }
            pb_clone.set_position(downloaded);
        });

    let paths = fetch_checkpoints(dir, &checkpoints, force, Some(&progress))?;

    pb.finish_with_message(format!("{} checkpoint(s) ready", paths.len()));
    Ok(())
}

fn list_models(dir: &std::path::Path) {
    let checkpoints = list_checkpoints(dir);

    println!("Weights directory: {}", dir.display());
    println!();

    for (info, installed) in &checkpoints {
        let status = if *installed { "✓" } else { "✗" };
        println!("  {status} {} ({})", info.short_name(), info.filename);
    }

    println!();
    let installed_count = checkpoints.iter().filter(|(_, installed)| *installed).count();
    println!(
        "{installed_count}/{} checkpoints installed",
        checkpoints.len()
    );
}
