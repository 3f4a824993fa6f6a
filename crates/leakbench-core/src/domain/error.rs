//! Domain-level error taxonomy for LeakBench.

use crate::model::ProviderError;
use crate::sandbox::SandboxError;

/// Errors produced while assembling problem tables.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("column '{name}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
}

/// LeakBench domain errors.
///
/// Only failures that must abort an episode end up here. Agent misbehaviour
/// (bad code, malformed submissions) is recovered locally and never becomes
/// a `HarnessError`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("model provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("invalid problem table: {0}")]
    Table(#[from] TableError),

    #[error("duplicate tool registration: {0}")]
    DuplicateTool(String),
}

/// Result type for LeakBench domain operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderErrorKind;

    #[test]
    fn test_table_error_display() {
        let err = TableError::RaggedColumn {
            name: "num_0".to_string(),
            expected: 10,
            actual: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("num_0"));
        assert!(msg.contains("expected 10"));
    }

    #[test]
    fn test_provider_error_converts() {
        let err: HarnessError = ProviderError::new(ProviderErrorKind::Fatal, "bad key").into();
        assert!(err.to_string().contains("model provider error"));
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn test_sandbox_abort_converts() {
        let err: HarnessError = SandboxError::Aborted("KeyboardInterrupt".to_string()).into();
        assert!(err.to_string().contains("sandbox error"));
    }
}
