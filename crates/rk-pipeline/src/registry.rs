//! Step registry: named pipelines of [`Step`]s in registration order.
//!
//! The registry is an ordinary value built once at startup and handed to
//! executors by reference. Toggling a step needs `&mut` access, so it can
//! never race with a run that borrows the registry.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::context::Context;
use crate::step::{Step, StepConfig, StepDescriptor};

/// A collection of pipelines, each an ordered list of uniquely named steps.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    pipelines: BTreeMap<String, Vec<Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step function under `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns [`rk_core::Error::Conflict`] if `name` is already registered in
    /// the same pipeline.
    pub fn register(
        &mut self,
        pipeline: &str,
        name: &str,
        function: impl Fn(&Context, &StepConfig) -> rk_core::Result<Value> + Send + Sync + 'static,
        enabled_by_default: bool,
        description: &str,
    ) -> rk_core::Result<()> {
        let step = Step::new(name, function)
            .with_enabled(enabled_by_default)
            .with_description(description);
        self.register_step(pipeline, step)
    }

    /// Register a pre-built step (e.g. one declaring accepted parameters).
    pub fn register_step(&mut self, pipeline: &str, step: Step) -> rk_core::Result<()> {
        let steps = self.pipelines.entry(pipeline.to_string()).or_default();
        if steps.iter().any(|s| s.name() == step.name()) {
            return Err(rk_core::Error::Conflict(format!(
                "step {} already registered in pipeline {pipeline}",
                step.name()
            )));
        }
        tracing::debug!(pipeline, step = step.name(), "Registered step");
        steps.push(step);
        Ok(())
    }

    pub fn get_step(&self, pipeline: &str, name: &str) -> Option<&Step> {
        self.pipelines
            .get(pipeline)
            .and_then(|steps| steps.iter().find(|s| s.name() == name))
    }

    /// Steps of `pipeline` in registration order; empty for unknown pipelines.
    pub fn steps(&self, pipeline: &str) -> &[Step] {
        self.pipelines
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn list_steps(&self, pipeline: &str) -> Vec<StepDescriptor> {
        self.steps(pipeline).iter().map(Step::descriptor).collect()
    }

    /// Enable or disable a step for runs started after this call.
    ///
    /// # Errors
    ///
    /// Returns [`rk_core::Error::NotFound`] for an unknown pipeline or step.
    pub fn set_enabled(&mut self, pipeline: &str, name: &str, enabled: bool) -> rk_core::Result<()> {
        let step = self
            .pipelines
            .get_mut(pipeline)
            .and_then(|steps| steps.iter_mut().find(|s| s.name() == name))
            .ok_or_else(|| rk_core::Error::not_found("step", format!("{pipeline}/{name}")))?;
        step.set_enabled(enabled);
        Ok(())
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}
