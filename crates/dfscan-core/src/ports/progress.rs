//! Progress reporting port for UI integration.

use crate::domain::FrameReport;

/// Events emitted while scoring a batch of frames.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Scoring started for a frame.
    Started {
        /// Path to the frame.
        path: String,
        /// Index in the batch (0-based).
        index: usize,
        /// Total frames in batch, if known.
        total: Option<usize>,
    },
    /// Scoring completed for a frame.
    Completed {
        /// The frame report.
        report: FrameReport,
    },
    /// A frame was skipped due to an error.
    Skipped {
        /// Path to the frame.
        path: String,
        /// Reason for skipping.
        reason: String,
    },
    /// All frames have been processed.
    Finished {
        /// Total frames scored successfully.
        processed: usize,
        /// Total frames skipped.
        skipped: usize,
    },
}

/// Port for receiving progress events.
pub trait ProgressSink: Send + Sync {
    /// Called when a progress event occurs.
    fn on_event(&self, event: ProgressEvent);
}
