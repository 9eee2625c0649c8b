//! Progress reporters.
//!
//! The trait itself lives in `rk_core` next to [`ProgressEvent`] so that the
//! event bus can implement it. This module holds the reporters the pipeline
//! ships with.

use std::sync::Arc;

use rk_core::{FileId, ProgressEvent, ProgressStatus, SubProgress};

pub use rk_core::ProgressReporter;

/// Reporter backed by a caller-supplied callback.
pub struct ProgressSender {
    callback: Box<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    pub fn send(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

impl ProgressReporter for ProgressSender {
    fn on_progress(&self, event: ProgressEvent) {
        self.send(event);
    }
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Reporter that writes each event as a tracing log line.
///
/// Intermediate events go to `debug` so that compression does not flood the
/// default `info` output; terminal events go to `info` or `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn on_progress(&self, event: ProgressEvent) {
        match event.status {
            ProgressStatus::Processing => tracing::debug!(
                file_id = %event.file_id,
                step = %event.step_name,
                "[{:.0}%] {}",
                event.percent,
                event.step_name
            ),
            ProgressStatus::Completed => tracing::info!(
                file_id = %event.file_id,
                step = %event.step_name,
                "Completed: {}",
                event.step_name
            ),
            ProgressStatus::Failed => tracing::warn!(
                file_id = %event.file_id,
                step = %event.step_name,
                "Failed: {}",
                event.step_name
            ),
        }
    }
}

/// A reporter bound to one file, used by step runners.
#[derive(Clone)]
pub struct StepProgress {
    reporter: Arc<dyn ProgressReporter>,
    file_id: FileId,
}

impl StepProgress {
    pub fn new(reporter: Arc<dyn ProgressReporter>, file_id: FileId) -> Self {
        Self { reporter, file_id }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn started(&self, step: &str) {
        self.reporter
            .on_progress(ProgressEvent::started(self.file_id, step));
    }

    pub fn processing(&self, step: &str, percent: f32, sub_progress: Option<SubProgress>) {
        self.reporter.on_progress(ProgressEvent::processing(
            self.file_id,
            step,
            percent,
            sub_progress,
        ));
    }

    pub fn completed(&self, step: &str) {
        self.reporter
            .on_progress(ProgressEvent::completed(self.file_id, step));
    }

    pub fn failed(&self, step: &str) {
        self.reporter
            .on_progress(ProgressEvent::failed(self.file_id, step, 0.0));
    }
}

impl std::fmt::Debug for StepProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepProgress")
            .field("file_id", &self.file_id)
            .finish_non_exhaustive()
    }
}
