//! Persisted view of an execution and its steps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::StateBag;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Unique id of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique id of one step instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for StepId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of an execution.
///
/// `Pending → Running → {Succeeded | Failed | Aborted}`. `Pending → Aborted`
/// is also allowed for executions recovered after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Succeeded => "SUCCEEDED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Aborted
        )
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Aborted) | (Running, Succeeded | Failed | Aborted)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(WorkflowStatus::Pending),
            "RUNNING" => Ok(WorkflowStatus::Running),
            "SUCCEEDED" => Ok(WorkflowStatus::Succeeded),
            "FAILED" => Ok(WorkflowStatus::Failed),
            "ABORTED" => Ok(WorkflowStatus::Aborted),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// Lifecycle of a step.
///
/// `Pending → Running → {Succeeded | Failed}`, or `Pending → Skipped` when
/// the execution failed before the step was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Succeeded => "SUCCEEDED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Skipped) | (Running, Succeeded | Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "SUCCEEDED" => Ok(StepStatus::Succeeded),
            "FAILED" => Ok(StepStatus::Failed),
            "SKIPPED" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Execution-level fields of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub input: StateBag,
    /// Final state bag, set once the execution is terminal.
    pub output: Option<StateBag>,
    pub current_step_index: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the execution failed or was aborted.
    pub error: Option<String>,
}

/// One step of a snapshot, keyed by `(execution id, index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Delta returned by the step, or the absorbed error delta.
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Full persisted state of an execution at one point in its state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    #[serde(flatten)]
    pub execution: ExecutionRecord,
    pub steps: Vec<StepRecord>,
}

impl ExecutionSnapshot {
    pub fn id(&self) -> ExecutionId {
        self.execution.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.execution.status
    }

    pub fn is_terminal(&self) -> bool {
        self.execution.status.is_terminal()
    }

    /// Step record by name.
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Output value at `key`, when the execution has an output.
    pub fn output_value(&self, key: &str) -> Option<&Value> {
        self.execution.output.as_ref()?.get(key)
    }
}

/// Filter for listing executions. Results are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub status: Option<WorkflowStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl ExecutionFilter {
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_transitions() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Aborted));
        assert!(!Pending.can_transition_to(Succeeded));
        for terminal in [Succeeded, Failed, Aborted] {
            assert!(terminal.is_terminal());
            for next in [Pending, Running, Succeeded, Failed, Aborted] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_step_transitions() {
        use StepStatus::*;
        assert!(Pending.can_transition_to(Skipped));
        assert!(!Running.can_transition_to(Skipped));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Running.is_terminal());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(WorkflowStatus::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!("running".parse::<WorkflowStatus>().unwrap(), WorkflowStatus::Running);
        assert_eq!("SKIPPED".parse::<StepStatus>().unwrap(), StepStatus::Skipped);
        assert!("DONE".parse::<WorkflowStatus>().is_err());
        assert_eq!(
            serde_json::to_value(WorkflowStatus::Aborted).unwrap(),
            serde_json::json!("ABORTED")
        );
    }

    #[test]
    fn test_execution_id_roundtrip() {
        let id = ExecutionId::new();
        assert_eq!(id.to_string().parse::<ExecutionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ExecutionId>().is_err());
    }
}
