//! Sequential executor: runs a registered pipeline step by step, merging each
//! step's output into the context.
//!
//! A failing step never aborts the run. Its error is recorded under the step
//! name and the next step sees the context as it was. The only early exit is
//! the duplicate stop flag.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rk_core::FileId;
use serde_json::Value;

use crate::context::Context;
use crate::progress::{NoopReporter, ProgressReporter, StepProgress};
use crate::registry::StepRegistry;
use crate::run::{PipelineRun, RunOptions, SkipReason, StopReason};
use crate::step::Step;

/// Context key a step sets to request that the run stop as a duplicate.
pub const STOP_FLAG: &str = "stop_flag";

/// Runs the steps of one pipeline in registration order.
pub struct SequentialExecutor<'a> {
    registry: &'a StepRegistry,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a> SequentialExecutor<'a> {
    pub fn new(registry: &'a StepRegistry) -> Self {
        Self {
            registry,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Builder: attach a progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run `pipeline` over `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`rk_core::Error::NotFound`] if no steps are registered under
    /// `pipeline`. Step failures are recorded in the returned run instead.
    pub fn run(
        &self,
        pipeline: &str,
        initial: Context,
        options: &RunOptions,
    ) -> rk_core::Result<PipelineRun<Context>> {
        self.run_file(FileId::new(), pipeline, initial, options)
    }

    /// Like [`run`](Self::run), tagging progress events with `file_id`.
    pub fn run_file(
        &self,
        file_id: FileId,
        pipeline: &str,
        initial: Context,
        options: &RunOptions,
    ) -> rk_core::Result<PipelineRun<Context>> {
        let steps = self.registry.steps(pipeline);
        if steps.is_empty() {
            return Err(rk_core::Error::not_found("pipeline", pipeline));
        }

        let progress = StepProgress::new(self.reporter.clone(), file_id);
        let mut run = PipelineRun::new(initial);

        for step in steps {
            if !options.is_enabled(step.name(), step.enabled()) {
                tracing::debug!(step = step.name(), "Skipping disabled step");
                run.record_skip(step.name(), SkipReason::Disabled);
                continue;
            }

            tracing::info!(%file_id, "Starting: {}", step.name());
            progress.started(step.name());

            match call_step(step, &run.context, options) {
                Ok(output) => {
                    merge_output(&mut run.context, step.name(), output);
                    run.record_completed(step.name());
                    progress.completed(step.name());
                }
                Err(e) => {
                    tracing::warn!(%file_id, step = step.name(), "Step failed: {e}");
                    progress.failed(step.name());
                    run.record_error(step.name(), e);
                    continue;
                }
            }

            if run.context.flag(STOP_FLAG) {
                if options.force_reprocess {
                    tracing::info!(%file_id, "Duplicate flagged by {}; reprocessing anyway", step.name());
                } else {
                    tracing::info!(%file_id, "Duplicate flagged by {}; stopping", step.name());
                    run.stop(StopReason::DuplicateDetected);
                    break;
                }
            }
        }

        Ok(run)
    }
}

/// Invoke a step, turning a panic into an error for that step alone.
fn call_step(step: &Step, context: &Context, options: &RunOptions) -> rk_core::Result<Value> {
    let config = step.filter_config(&options.config);
    panic::catch_unwind(AssertUnwindSafe(|| step.call(context, &config))).unwrap_or_else(|payload| {
        Err(rk_core::Error::pipeline(
            step.name(),
            format!("step panicked: {}", panic_message(payload.as_ref())),
        ))
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn merge_output(context: &mut Context, step: &str, output: Value) {
    match output {
        Value::Null => {}
        Value::Object(map) => context.merge(map),
        other => {
            context.insert(step, other);
        }
    }
}
