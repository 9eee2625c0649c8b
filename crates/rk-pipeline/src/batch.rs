//! Batch concurrency controller.
//!
//! A fixed pool of workers pulls files off a shared queue and runs one flow
//! at a time each, so at most `concurrency_limit` files are in flight.
//! Outcomes come back over a channel in completion order.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rk_core::{BatchId, FileId, RecordId};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collaborators::Session;
use crate::flow::{FlowContext, FlowOrchestrator, FlowRequest};
use crate::run::{PipelineRun, RunOptions, RunSummary, StopReason};
use crate::sequential::panic_message;

/// The result of one file's flow.
#[derive(Debug)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub file_id: FileId,
    pub run: PipelineRun<FlowContext>,
}

/// The result of a whole batch.
#[derive(Debug)]
pub struct BatchRun {
    pub batch_id: BatchId,
    pub user_id: String,
    /// Input files in submission order.
    pub files: Vec<PathBuf>,
    /// The limit actually applied, after clamping.
    pub concurrency_limit: usize,
    /// One entry per processed file, in completion order.
    pub outcomes: Vec<FileOutcome>,
    /// Files never started because the batch was cancelled.
    pub unprocessed: Vec<PathBuf>,
}

impl BatchRun {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.run.stop_reason == StopReason::None)
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.run.stop_reason == StopReason::DuplicateDetected)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.run.is_success()).count()
    }

    /// Serializable view for `--json` output.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            user_id: self.user_id.clone(),
            concurrency_limit: self.concurrency_limit,
            files: self
                .outcomes
                .iter()
                .map(|o| FileSummary {
                    file: o.file.clone(),
                    file_id: o.file_id,
                    record_id: o.run.context.record_id,
                    run: o.run.summary(),
                })
                .collect(),
            unprocessed: self.unprocessed.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub user_id: String,
    pub concurrency_limit: usize,
    pub files: Vec<FileSummary>,
    pub unprocessed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file: PathBuf,
    pub file_id: FileId,
    pub record_id: Option<RecordId>,
    #[serde(flatten)]
    pub run: RunSummary,
}

/// Runs many files through one [`FlowOrchestrator`] with bounded concurrency.
pub struct BatchController {
    orchestrator: Arc<FlowOrchestrator>,
    options: Arc<RunOptions>,
    user_id: String,
    session: Option<Session>,
    cancel: CancellationToken,
}

impl BatchController {
    pub fn new(orchestrator: Arc<FlowOrchestrator>) -> Self {
        Self {
            orchestrator,
            options: Arc::new(RunOptions::default()),
            user_id: String::from("anonymous"),
            session: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    /// Builder: cancelling `token` stops workers from taking new files and
    /// aborts the steps of files in flight.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process `files` with at most `concurrency_limit` flows at once.
    pub async fn run_batch(&self, files: Vec<PathBuf>, concurrency_limit: usize) -> BatchRun {
        let batch_id = BatchId::new();
        let limit = if concurrency_limit == 0 {
            tracing::warn!("Concurrency limit 0 is invalid; using 1");
            1
        } else {
            concurrency_limit
        };
        let workers = limit.min(files.len());
        tracing::info!(
            %batch_id,
            files = files.len(),
            workers,
            user_id = %self.user_id,
            "Starting batch"
        );

        let queue = Arc::new(Mutex::new(files.iter().cloned().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel::<FileOutcome>();

        for worker in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let orchestrator = self.orchestrator.clone();
            let options = self.options.clone();
            let user_id = self.user_id.clone();
            let session = self.session.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        tracing::debug!(worker, "Batch cancelled; worker stopping");
                        break;
                    }
                    let Some(path) = queue.lock().pop_front() else {
                        break;
                    };

                    let request = FlowRequest {
                        path: path.clone(),
                        file_id: FileId::new(),
                        batch_id: Some(batch_id),
                        user_id: user_id.clone(),
                        session: session.clone(),
                        options: options.clone(),
                        cancel: cancel.child_token(),
                    };
                    let outcome = run_isolated(&orchestrator, request).await;
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(files.len());
        while let Some(outcome) = rx.recv().await {
            tracing::info!(
                %batch_id,
                file = %outcome.file.display(),
                stop_reason = ?outcome.run.stop_reason,
                "[{}/{}] Finished",
                outcomes.len() + 1,
                files.len()
            );
            outcomes.push(outcome);
        }

        let unprocessed: Vec<PathBuf> = queue.lock().drain(..).collect();
        if !unprocessed.is_empty() {
            tracing::warn!(%batch_id, count = unprocessed.len(), "Files left unprocessed");
        }

        BatchRun {
            batch_id,
            user_id: self.user_id.clone(),
            files,
            concurrency_limit: limit,
            outcomes,
            unprocessed,
        }
    }
}

/// Run one flow on its own task so a panic stays with this file.
async fn run_isolated(orchestrator: &Arc<FlowOrchestrator>, request: FlowRequest) -> FileOutcome {
    let file = request.path.clone();
    let file_id = request.file_id;
    let batch_id = request.batch_id;

    let orchestrator = orchestrator.clone();
    let run = match tokio::spawn(async move { orchestrator.run(request).await }).await {
        Ok(run) => run,
        Err(e) => {
            let message = if e.is_panic() {
                format!("flow panicked: {}", panic_message(e.into_panic().as_ref()))
            } else {
                format!("flow task failed: {e}")
            };
            tracing::error!(file = %file.display(), "{message}");
            let mut run = PipelineRun::new(FlowContext::new(file.clone(), file_id, batch_id));
            run.record_error("flow", rk_core::Error::Internal(message));
            run.stop(StopReason::FatalError);
            run
        }
    };

    FileOutcome { file, file_id, run }
}
