//! Error types for sandbox operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing an extraction strategy.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The strategy failed to parse, or does not define exactly one entry point.
    #[error("Strategy compilation failed: {0}")]
    Compile(String),

    /// The strategy raised an error while running.
    #[error("Strategy raised an error: {message}")]
    Runtime { message: String },

    /// The strategy exceeded its wall-clock or operation budget.
    #[error("Strategy timed out after {0:?}")]
    Timeout(Duration),

    /// The strategy returned something other than a list of records.
    #[error("Strategy returned invalid output: {0}")]
    InvalidOutputShape(String),
}

impl SandboxError {
    /// Build a runtime error from any displayable message.
    pub fn runtime(message: impl Into<String>) -> Self {
        SandboxError::Runtime {
            message: message.into(),
        }
    }

    /// The coarse category of this error.
    pub fn kind(&self) -> SandboxErrorKind {
        match self {
            SandboxError::Compile(_) => SandboxErrorKind::CompileError,
            SandboxError::Runtime { .. } => SandboxErrorKind::RuntimeError,
            SandboxError::Timeout(_) => SandboxErrorKind::TimeoutError,
            SandboxError::InvalidOutputShape(_) => SandboxErrorKind::InvalidOutputShape,
        }
    }
}

/// Category of a [`SandboxError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxErrorKind {
    CompileError,
    RuntimeError,
    TimeoutError,
    InvalidOutputShape,
}

impl fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxErrorKind::CompileError => "CompileError",
            SandboxErrorKind::RuntimeError => "RuntimeError",
            SandboxErrorKind::TimeoutError => "TimeoutError",
            SandboxErrorKind::InvalidOutputShape => "InvalidOutputShape",
        };
        f.write_str(s)
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SandboxError::Compile("x".into()).kind(),
            SandboxErrorKind::CompileError
        );
        assert_eq!(
            SandboxError::runtime("boom").kind(),
            SandboxErrorKind::RuntimeError
        );
        assert_eq!(
            SandboxError::Timeout(Duration::from_secs(1)).kind(),
            SandboxErrorKind::TimeoutError
        );
        assert_eq!(
            SandboxError::InvalidOutputShape("x".into()).kind(),
            SandboxErrorKind::InvalidOutputShape
        );
    }

    #[test]
    fn test_display_includes_message() {
        let err = SandboxError::runtime("index out of bounds");
        assert!(err.to_string().contains("index out of bounds"));
        assert_eq!(SandboxErrorKind::TimeoutError.to_string(), "TimeoutError");
    }
}
