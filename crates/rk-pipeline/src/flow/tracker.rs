//! Per-file bookkeeping shared by every task of one flow.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::catalog::FlowStep;
use crate::progress::StepProgress;
use crate::run::{PipelineRun, RunOptions, SkipReason, SkippedStep, StopReason};

#[derive(Default)]
struct Ledger {
    errors: BTreeMap<String, rk_core::Error>,
    skipped: Vec<SkippedStep>,
    completed: Vec<String>,
}

struct Inner {
    progress: StepProgress,
    options: Arc<RunOptions>,
    timeout: Duration,
    cancel: CancellationToken,
    ledger: Mutex<Ledger>,
}

/// Runs steps under the timeout and cancellation token, emits their progress
/// events and records how each one ended.
#[derive(Clone)]
pub(crate) struct StepTracker {
    inner: Arc<Inner>,
}

impl StepTracker {
    pub(crate) fn new(
        progress: StepProgress,
        options: Arc<RunOptions>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                progress,
                options,
                timeout,
                cancel,
                ledger: Mutex::new(Ledger::default()),
            }),
        }
    }

    pub(crate) fn progress(&self) -> &StepProgress {
        &self.inner.progress
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn force_reprocess(&self) -> bool {
        self.inner.options.force_reprocess
    }

    pub(crate) fn is_enabled(&self, step: FlowStep) -> bool {
        self.inner
            .options
            .is_enabled(step.name(), step.enabled_by_default())
    }

    /// `true` if `step` may run; otherwise records it as disabled.
    pub(crate) fn gate(&self, step: FlowStep) -> bool {
        if self.is_enabled(step) {
            true
        } else {
            self.skip(step, SkipReason::Disabled);
            false
        }
    }

    pub(crate) fn skip(&self, step: FlowStep, reason: SkipReason) {
        tracing::debug!(
            file_id = %self.inner.progress.file_id(),
            step = step.name(),
            "Skipping: {reason}"
        );
        self.inner.ledger.lock().skipped.push(SkippedStep {
            step: step.name().to_string(),
            reason,
        });
    }

    pub(crate) fn record_error(&self, step: &str, error: rk_core::Error) {
        self.inner.ledger.lock().errors.insert(step.to_string(), error);
    }

    /// Messages of the errors recorded so far.
    pub(crate) fn error_messages(&self) -> BTreeMap<String, String> {
        self.inner
            .ledger
            .lock()
            .errors
            .iter()
            .map(|(step, e)| (step.clone(), e.to_string()))
            .collect()
    }

    /// Run `fut` as `step`: start event, timeout, cancellation, terminal event.
    ///
    /// The error is returned, not recorded, so the caller decides whether it
    /// is tolerated or fatal.
    pub(crate) async fn execute<T, F>(&self, step: FlowStep, fut: F) -> rk_core::Result<T>
    where
        F: Future<Output = rk_core::Result<T>>,
    {
        let name = step.name();
        let progress = &self.inner.progress;
        tracing::debug!(file_id = %progress.file_id(), step = name, "Starting: {name}");
        progress.started(name);

        let timeout = self.inner.timeout;
        let outcome = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(rk_core::Error::Cancelled),
            result = tokio::time::timeout(timeout, fut) => result.unwrap_or_else(|_| {
                Err(rk_core::Error::Timeout {
                    step: name.to_string(),
                    secs: timeout.as_secs(),
                })
            }),
        };

        match &outcome {
            Ok(_) => {
                progress.completed(name);
                self.inner.ledger.lock().completed.push(name.to_string());
            }
            Err(e) => {
                tracing::warn!(
                    file_id = %progress.file_id(),
                    step = name,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Step failed"
                );
                progress.failed(name);
            }
        }
        outcome
    }

    /// Like [`execute`](Self::execute), recording a failure as tolerated.
    pub(crate) async fn attempt<T, F>(&self, step: FlowStep, fut: F) -> Option<T>
    where
        F: Future<Output = rk_core::Result<T>>,
    {
        match self.execute(step, fut).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error(step.name(), e);
                None
            }
        }
    }

    /// Move the ledger into a finished run.
    pub(crate) fn finish<C>(&self, context: C, stop: Option<StopReason>) -> PipelineRun<C> {
        let ledger = std::mem::take(&mut *self.inner.ledger.lock());
        let mut run = PipelineRun::new(context);
        run.step_errors = ledger.errors;
        run.skipped = ledger.skipped;
        run.completed = ledger.completed;
        if let Some(reason) = stop {
            run.stop(reason);
        }
        run
    }
}
