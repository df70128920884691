//! Result output port for writing frame reports.

use crate::domain::FrameReport;

/// Port for outputting frame reports.
pub trait ResultOutput: Send + Sync {
    /// Writes a single frame report.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write(&self, report: &FrameReport) -> anyhow::Result<()>;

    /// Flushes any buffered output.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&self) -> anyhow::Result<()>;
}
