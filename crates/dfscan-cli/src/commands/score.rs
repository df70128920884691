//! Score command - run the model pool over image files.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use dfscan_adapters::{iso_timestamp, FsFrameSource};
use dfscan_core::{
    FrameAnalyzer, FrameReport, FrameSource, ProgressEvent, ProgressSink, ResultOutput, Verdict,
};
use tracing::{info, warn};

use super::{ExitCode, ModelArgs};
use crate::config::AppConfig;
use crate::output::{JsonOutput, ProgressBar};

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON Lines (one JSON object per line)
    #[default]
    Jsonl,
    /// Single JSON array
    Json,
}

/// Arguments for the score command.
#[derive(Args, Clone)]
pub struct ScoreArgs {
    /// Image files or directories to score
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Show progress bar
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,
}

impl ScoreArgs {
    /// Apply configuration file values, respecting CLI precedence.
    pub fn with_config(mut args: Self, config: &AppConfig) -> Self {
        args.models = ModelArgs::with_config(args.models, config);

        if !args.recursive {
            args.recursive = config.general.recursive.unwrap_or(false);
        }

        if args.format.is_none() {
            args.format = config
                .output
                .format
                .as_ref()
                .and_then(|s| match s.as_str() {
                    "json" => Some(OutputFormat::Json),
                    "jsonl" => Some(OutputFormat::Jsonl),
                    _ => None,
                });
        }

        if !args.pretty {
            args.pretty = config.output.pretty.unwrap_or(false);
        }
        if !args.progress {
            args.progress = config.output.progress.unwrap_or(false);
        }

        args
    }

    /// Get output format with fallback to JSONL.
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }
}

/// Result of running the score command.
#[derive(Debug)]
pub struct ScoreResult {
    /// Number of frames scored.
    pub processed: usize,
    /// Number of frames skipped.
    pub skipped: usize,
    /// Number of frames with a high deepfake probability.
    pub flagged: usize,
    /// Exit code.
    pub exit_code: ExitCode,
}

/// Run the score command.
///
/// The pool is loaded before any frame is read, so a bad weight set fails
/// the command without output.
///
/// Expects `args` to have been processed through `with_config()` first.
pub fn run(args: &ScoreArgs) -> Result<ScoreResult> {
    info!("Running score command on {} paths", args.paths.len());

    let analyzer = args.models.build_analyzer()?;

    let source = FsFrameSource::new(args.paths.clone(), args.recursive);
    let total = source.count_hint();

    let show_progress = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let progress = ProgressBar::new(total.map(|t| t as u64), args.quiet, show_progress);
    let output = JsonOutput::stdout();

    let (result, batched) = score_frames(&analyzer, &source, &output, &progress, args.format())?;
    if args.format() == OutputFormat::Json {
        output.write_array(&batched, args.pretty)?;
        output.flush()?;
    }
    info!(
        processed = result.processed,
        skipped = result.skipped,
        flagged = result.flagged,
        "Scoring finished"
    );
    Ok(result)
}

/// Scores every frame from `source`.
///
/// JSON Lines reports are written as they are produced; for `Json` they are
/// returned for the caller to write as one array.
fn score_frames(
    analyzer: &FrameAnalyzer,
    source: &dyn FrameSource,
    output: &dyn ResultOutput,
    progress: &dyn ProgressSink,
    format: OutputFormat,
) -> Result<(ScoreResult, Vec<FrameReport>)> {
    let total = source.count_hint();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut flagged = 0usize;
    let mut batched: Vec<FrameReport> = Vec::new();

    for (index, frame_result) in source.frames().enumerate() {
        let frame = match frame_result {
            Ok(frame) => frame,
            Err(e) => {
                // The error message carries the path via anyhow context
                progress.on_event(ProgressEvent::Skipped {
                    path: format!("frame {index}"),
                    reason: format!("{e:#}"),
                });
                skipped += 1;
                continue;
            }
        };

        progress.on_event(ProgressEvent::Started {
            path: frame.path.clone(),
            index,
            total,
        });

        let analysis = match analyzer.analyze_image(&frame.image) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Scoring failed for {}: {e}", frame.path);
                progress.on_event(ProgressEvent::Skipped {
                    path: frame.path,
                    reason: e.to_string(),
                });
                skipped += 1;
                continue;
            }
        };

        if analysis.verdict == Verdict::High {
            flagged += 1;
        }

        let report = FrameReport {
            path: frame.path.clone(),
            timestamp: iso_timestamp(),
            dimensions: frame.dimensions(),
            analysis,
        };

        progress.on_event(ProgressEvent::Completed {
            report: report.clone(),
        });

        match format {
            OutputFormat::Jsonl => output.write(&report)?,
            OutputFormat::Json => batched.push(report),
        }

        processed += 1;
    }

    output.flush()?;

    progress.on_event(ProgressEvent::Finished { processed, skipped });

    let exit_code = if flagged > 0 {
        ExitCode::DeepfakeFound
    } else {
        ExitCode::Success
    };

    let result = ScoreResult {
        processed,
        skipped,
        flagged,
        exit_code,
    };
    Ok((result, batched))
}
