//! # rk-pipeline
//!
//! Step orchestration for media ingest.
//!
//! This crate provides:
//!
//! - **[`Step`]** and **[`StepRegistry`]** -- named, toggleable transforms over
//!   a JSON [`Context`], grouped into pipelines.
//! - **[`SequentialExecutor`]** -- runs a registered pipeline step by step,
//!   tolerating step failures and honouring the duplicate stop flag.
//! - **[`FlowOrchestrator`]** -- the dependency-aware ingest graph: duplicate
//!   barrier, concurrent extractors, joins and an ordered tail.
//! - **[`consolidate`]** -- priority merge of extractor output.
//! - **[`BatchController`]** -- bounded-concurrency processing of many files.
//! - **Progress reporters** ([`progress`]) and the collaborator traits
//!   ([`collaborators`]) the flow delegates to.

pub mod batch;
pub mod catalog;
pub mod collaborators;
pub mod consolidate;
pub mod context;
pub mod flow;
pub mod progress;
pub mod record;
pub mod registry;
pub mod run;
pub mod sequential;
pub mod step;

// Re-export key types at the crate root.
pub use batch::{BatchController, BatchRun, FileOutcome};
pub use catalog::FlowStep;
pub use collaborators::{Collaborators, EncodeProgress, Extractors, MetadataMap, Session};
pub use consolidate::{consolidate, ConsolidatedMetadata, MetadataField, MetadataSource, SourceReport};
pub use context::Context;
pub use flow::{FlowContext, FlowOrchestrator, FlowRequest, FlowSettings};
pub use progress::{LogReporter, NoopReporter, ProgressReporter, ProgressSender};
pub use record::MediaRecord;
pub use registry::StepRegistry;
pub use run::{PipelineRun, RunOptions, SkipReason, StopReason};
pub use sequential::SequentialExecutor;
pub use step::{Step, StepConfig, StepDescriptor};
