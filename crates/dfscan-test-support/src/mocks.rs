//! Mock implementations of core port traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use candle_core::Tensor;
use dfscan_core::domain::{FrameInfo, FrameReport};
use dfscan_core::ports::{FrameScorer, FrameSource, ProgressEvent, ProgressSink, ResultOutput};

/// Scorer that returns a fixed logit for every frame.
#[derive(Debug, Clone, Copy)]
pub struct MockScorer {
    logit: f32,
}

impl MockScorer {
    /// Creates a scorer returning `logit`.
    #[must_use]
    pub const fn new(logit: f32) -> Self {
        Self { logit }
    }

    /// Creates a scorer whose sigmoid output is `probability`.
    ///
    /// `probability` must lie strictly inside `(0, 1)`.
    #[must_use]
    pub fn from_probability(probability: f32) -> Self {
        Self::new((probability / (1.0 - probability)).ln())
    }

    /// The logit returned for every frame.
    #[must_use]
    pub const fn logit(&self) -> f32 {
        self.logit
    }
}

impl FrameScorer for MockScorer {
    fn score(&self, _input: &Tensor) -> anyhow::Result<f32> {
        Ok(self.logit)
    }
}

/// Scorer that always fails, standing in for a device or shape failure.
#[derive(Debug, Clone)]
pub struct FailingScorer {
    message: String,
}

impl FailingScorer {
    /// Creates a scorer that fails with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingScorer {
    fn default() -> Self {
        Self::new("simulated inference failure")
    }
}

impl FrameScorer for FailingScorer {
    fn score(&self, _input: &Tensor) -> anyhow::Result<f32> {
        anyhow::bail!("{}", self.message)
    }
}

/// Scorer that returns a fixed logit and records what it was given.
///
/// Clones share their records, so a clone kept by the test observes calls made
/// on the instance moved into a pool.
#[derive(Debug, Clone)]
pub struct RecordingScorer {
    logit: f32,
    calls: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Option<Tensor>>>,
}

impl RecordingScorer {
    /// Creates a recording scorer returning `logit`.
    #[must_use]
    pub fn new(logit: f32) -> Self {
        Self {
            logit,
            calls: Arc::new(AtomicUsize::new(0)),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of frames scored so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent input tensor, if any.
    #[must_use]
    pub fn last_input(&self) -> Option<Tensor> {
        self.last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FrameScorer for RecordingScorer {
    fn score(&self, input: &Tensor) -> anyhow::Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap_or_else(PoisonError::into_inner) = Some(input.clone());
        Ok(self.logit)
    }
}

/// Mock implementation of `FrameSource` for testing.
///
/// Yields pre-built frames and tracks iteration for assertions.
pub struct MockFrameSource {
    frames: Vec<FrameInfo>,
    iteration_count: Arc<Mutex<usize>>,
}

impl MockFrameSource {
    /// Creates a new mock source with the given frames.
    #[must_use]
    pub fn new(frames: Vec<FrameInfo>) -> Self {
        Self {
            frames,
            iteration_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an empty mock source.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Returns the number of times the source has been iterated.
    #[must_use]
    pub fn iteration_count(&self) -> usize {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for MockFrameSource {
    fn frames(&self) -> Box<dyn Iterator<Item = anyhow::Result<FrameInfo>> + Send + '_> {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Box::new(self.frames.iter().cloned().map(Ok))
    }

    fn count_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }
}

/// Mock implementation of `ResultOutput` for testing.
///
/// Captures reports for later assertions.
#[derive(Default)]
pub struct MockResultOutput {
    reports: Mutex<Vec<FrameReport>>,
    flush_count: AtomicUsize,
}

impl MockResultOutput {
    /// Creates a new mock output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured reports.
    #[must_use]
    pub fn reports(&self) -> Vec<FrameReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of times `flush()` was called.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }
}

impl ResultOutput for MockResultOutput {
    fn write(&self, report: &FrameReport) -> anyhow::Result<()> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock implementation of `ProgressSink` for testing.
///
/// Captures events for later assertions.
#[derive(Default)]
pub struct MockProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MockProgressSink {
    /// Creates a new mock progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `Completed` events.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Completed { .. }))
            .count()
    }

    /// Returns the number of `Skipped` events.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Skipped { .. }))
            .count()
    }

    /// Returns the final counts from the `Finished` event, if any.
    #[must_use]
    pub fn finished_counts(&self) -> Option<(usize, usize)> {
        self.events().iter().find_map(|e| match e {
            ProgressEvent::Finished { processed, skipped } => Some((*processed, *skipped)),
            _ => None,
        })
    }
}

impl ProgressSink for MockProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
