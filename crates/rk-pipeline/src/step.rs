//! The [`Step`] type: a named, independently toggleable unit of work.
//!
//! A step wraps a pure transform over the accumulated [`Context`]. It receives
//! the context plus the subset of run configuration it declared interest in,
//! and returns a JSON value the executor merges back into the context.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::Context;

/// Named configuration values handed to a step.
pub type StepConfig = Map<String, Value>;

/// The function contract of a step.
///
/// Returning `Value::Null` leaves the context untouched, an object is merged
/// key by key, and any other value is stored under the step's own name. The
/// context is only borrowed for the duration of the call.
pub type StepFn = Arc<dyn Fn(&Context, &StepConfig) -> rk_core::Result<Value> + Send + Sync>;

/// A single registered step.
#[derive(Clone)]
pub struct Step {
    name: String,
    description: String,
    enabled: bool,
    accepted_params: BTreeSet<String>,
    function: StepFn,
}

impl Step {
    /// Create an enabled step with no description and no accepted parameters.
    pub fn new(
        name: impl Into<String>,
        function: impl Fn(&Context, &StepConfig) -> rk_core::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            accepted_params: BTreeSet::new(),
            function: Arc::new(function),
        }
    }

    /// Builder: set the description shown by step listings.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set whether the step is enabled by default.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder: declare the configuration keys this step consumes.
    pub fn accepting<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn accepted_params(&self) -> &BTreeSet<String> {
        &self.accepted_params
    }

    /// Keep only the configuration entries this step declared.
    pub fn filter_config(&self, config: &StepConfig) -> StepConfig {
        config
            .iter()
            .filter(|(key, _)| self.accepted_params.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Invoke the step function.
    pub fn call(&self, context: &Context, config: &StepConfig) -> rk_core::Result<Value> {
        (self.function)(context, config)
    }

    /// Immutable listing view of this step.
    pub fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: self.name.clone(),
            enabled: self.enabled,
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("accepted_params", &self.accepted_params)
            .finish_non_exhaustive()
    }
}

/// What a CLI or API layer sees when listing steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub name: String,
    pub enabled: bool,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_fields() {
        let step = Step::new("probe", |_, _| Ok(Value::Null))
            .with_description("Container metadata")
            .with_enabled(false)
            .accepting(["timeout", "verbose"]);

        assert_eq!(step.name(), "probe");
        assert_eq!(step.description(), "Container metadata");
        assert!(!step.enabled());
        assert!(step.accepted_params().contains("timeout"));
    }

    #[test]
    fn filter_config_drops_undeclared_keys() {
        let step = Step::new("thumbs", |_, _| Ok(Value::Null)).accepting(["count"]);
        let mut config = StepConfig::new();
        config.insert("count".into(), json!(4));
        config.insert("crf".into(), json!(28));

        let filtered = step.filter_config(&config);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("count"), Some(&json!(4)));
    }

    #[test]
    fn call_passes_context_and_config() {
        let step = Step::new("echo", |ctx, cfg| {
            Ok(json!({
                "seen": ctx.get("input").cloned().unwrap_or(Value::Null),
                "param": cfg.get("p").cloned().unwrap_or(Value::Null),
            }))
        });
        let mut ctx = Context::new();
        ctx.insert("input", json!("a.mp4"));
        let mut cfg = StepConfig::new();
        cfg.insert("p".into(), json!(1));

        let out = step.call(&ctx, &cfg).unwrap();
        assert_eq!(out, json!({"seen": "a.mp4", "param": 1}));
    }

    #[test]
    fn descriptor_reflects_state() {
        let step = Step::new("hash", |_, _| Ok(Value::Null)).with_description("SHA-256");
        assert_eq!(
            step.descriptor(),
            StepDescriptor {
                name: "hash".into(),
                enabled: true,
                description: "SHA-256".into(),
            }
        );
    }
}
