//! Run-level options and results shared by both executors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::step::StepConfig;

/// Why a run stopped before reaching its last step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    None,
    /// The file's checksum matched an already ingested record.
    DuplicateDetected,
    /// A step whose failure cannot be tolerated failed.
    FatalError,
}

/// Why a step did not execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Disabled by default or by a per-run override.
    Disabled,
    /// An upstream step produced no usable output.
    MissingInput(String),
    /// Another source already provided what this step would compute.
    AlreadySatisfied,
    /// The step writes to shared storage and no session was supplied.
    Unauthenticated,
    /// No implementation was configured for the step's collaborator.
    Unconfigured,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::MissingInput(input) => write!(f, "missing input: {input}"),
            Self::AlreadySatisfied => f.write_str("already satisfied"),
            Self::Unauthenticated => f.write_str("no authenticated session"),
            Self::Unconfigured => f.write_str("not configured"),
        }
    }
}

/// A step that was not executed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Per-run knobs. A batch clones one of these for every file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Step name to enabled flag; wins over the step's default.
    pub overrides: BTreeMap<String, bool>,
    /// Continue past a duplicate match instead of stopping.
    pub force_reprocess: bool,
    /// Configuration offered to steps, filtered by their accepted params.
    pub config: StepConfig,
}

impl RunOptions {
    /// Resolve whether a step runs: the override if any, else the default.
    pub fn is_enabled(&self, step: &str, default: bool) -> bool {
        self.overrides.get(step).copied().unwrap_or(default)
    }

    /// Builder: enable or disable one step for this run.
    pub fn with_override(mut self, step: impl Into<String>, enabled: bool) -> Self {
        self.overrides.insert(step.into(), enabled);
        self
    }

    pub fn with_force_reprocess(mut self, force: bool) -> Self {
        self.force_reprocess = force;
        self
    }
}

/// The outcome of running one pipeline over one input.
///
/// `step_errors` holds every failure, tolerated or not. Only when
/// `stop_reason` is [`StopReason::FatalError`] did a failure end the run.
#[derive(Debug)]
pub struct PipelineRun<C> {
    pub context: C,
    pub stopped: bool,
    pub stop_reason: StopReason,
    pub step_errors: BTreeMap<String, rk_core::Error>,
    pub skipped: Vec<SkippedStep>,
    /// Steps that finished successfully, in completion order.
    pub completed: Vec<String>,
}

impl<C> PipelineRun<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            stopped: false,
            stop_reason: StopReason::None,
            step_errors: BTreeMap::new(),
            skipped: Vec::new(),
            completed: Vec::new(),
        }
    }

    pub fn stop(&mut self, reason: StopReason) {
        self.stopped = true;
        self.stop_reason = reason;
    }

    pub fn record_error(&mut self, step: impl Into<String>, error: rk_core::Error) {
        self.step_errors.insert(step.into(), error);
    }

    pub fn record_skip(&mut self, step: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedStep {
            step: step.into(),
            reason,
        });
    }

    pub fn record_completed(&mut self, step: impl Into<String>) {
        self.completed.push(step.into());
    }

    /// Whether the run ended without a fatal error. Duplicates count as
    /// success.
    pub fn is_success(&self) -> bool {
        self.stop_reason != StopReason::FatalError
    }

    pub fn skip_reason(&self, step: &str) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.reason)
    }

    /// Error messages keyed by step, for serialized summaries.
    pub fn error_messages(&self) -> BTreeMap<String, String> {
        self.step_errors
            .iter()
            .map(|(step, err)| (step.clone(), err.to_string()))
            .collect()
    }

    /// Serializable view of this run.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            stopped: self.stopped,
            stop_reason: self.stop_reason,
            step_errors: self.error_messages(),
            skipped: self.skipped.clone(),
            completed: self.completed.clone(),
        }
    }
}

/// Serializable run summary; the context is reported separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub stopped: bool,
    pub stop_reason: StopReason,
    pub step_errors: BTreeMap<String, String>,
    pub skipped: Vec<SkippedStep>,
    pub completed: Vec<String>,
}
