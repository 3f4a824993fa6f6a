//! Error types for the sandbox module.
//!
//! Code that fails inside a fragment is *not* an error at this level; it is
//! reported back to the agent through [`super::ExecutionReport`]. An
//! [`SandboxError::Aborted`] stops the whole run; the other variants mean the
//! kernel is unusable and end the current episode as a failure.

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("failed to spawn kernel `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("kernel exited unexpectedly")]
    KernelExited,

    #[error("kernel protocol violation: {0}")]
    Protocol(String),

    #[error("kernel io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel message encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// True when the run was asked to stop, as opposed to the kernel breaking.
    pub fn is_abort(&self) -> bool {
        matches!(self, SandboxError::Aborted(_))
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
