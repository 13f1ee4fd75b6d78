//! Workflow definitions and the name → definition map handed to the orchestrator.

use std::collections::{HashMap, HashSet};

use crate::step::StepTemplate;
use crate::{PipelineError, Result};

/// An ordered list of step templates under a name.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<StepTemplate>,
}

impl WorkflowDefinition {
    /// Validated constructor: at least one step, step names unique.
    pub fn new(name: impl Into<String>, steps: Vec<StepTemplate>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::InvalidWorkflow(
                "workflow name cannot be empty".to_string(),
            ));
        }
        if steps.is_empty() {
            return Err(PipelineError::InvalidWorkflow(format!(
                "workflow '{name}' has no steps"
            )));
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(PipelineError::InvalidWorkflow(format!(
                    "workflow '{name}' has duplicate step '{}'",
                    step.name()
                )));
            }
        }
        Ok(Self { name, steps })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepTemplate] {
        &self.steps
    }
}

/// Known workflows, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same name.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        if self.workflows.contains_key(definition.name()) {
            tracing::warn!(workflow = definition.name(), "Replacing registered workflow");
        }
        self.workflows.insert(definition.name().to_string(), definition);
    }

    pub fn with_workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
