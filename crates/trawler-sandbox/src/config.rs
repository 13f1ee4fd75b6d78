//! Sandbox configuration.

use std::time::Duration;

/// Budgets applied to a single strategy evaluation.
///
/// # Security Model
///
/// - **Time**: hard wall-clock deadline, checked inside the interpreter and
///   again by the async caller.
/// - **Work**: an operation budget so tight loops are cut off even when the
///   clock is generous.
/// - **Memory**: caps on string, array and map sizes built by the script.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget for compile + evaluation.
    pub timeout: Duration,

    /// Maximum interpreter operations per evaluation.
    pub max_operations: u64,

    /// Maximum length of any string built by the script (bytes).
    pub max_string_size: usize,

    /// Maximum number of elements in any array built by the script.
    pub max_array_size: usize,

    /// Maximum number of entries in any map built by the script.
    pub max_map_size: usize,

    /// Maximum function call nesting.
    pub max_call_levels: usize,

    /// Maximum number of records a strategy may return.
    pub max_records: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_operations: 50_000_000,
            max_string_size: 4 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 10_000,
            max_call_levels: 64,
            max_records: 10_000,
        }
    }
}

impl SandboxConfig {
    /// Create a new sandbox configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the operation budget.
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Set the maximum number of returned records.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }
}
