//! Metered execution of agent code fragments.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::error::{SandboxError, SandboxResult};
use super::kernel::{Kernel, KernelHost};
use super::quota::PrintQuota;
use crate::registry::{SubmissionRegistry, SubmitOutcome};

/// Marker appended to output cut at the character cap.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// What the agent sees after a fragment runs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Captured output, capped at the configured character count.
    pub output: String,
    /// Exception text, including quota violations.
    pub error: Option<String>,
}

impl ExecutionReport {
    /// Tool-result payload for the `python_expression` tool.
    pub fn to_tool_content(&self) -> Value {
        json!({"result": self.output, "error": self.error})
    }
}

/// Truncate `text` to `max_chars` characters, appending [`TRUNCATION_MARKER`].
pub fn truncate_output(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut out = text[..cut].to_string();
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text,
    }
}

/// Capabilities handed to the kernel for one fragment.
struct EpisodeHost<'a> {
    quota: &'a mut PrintQuota,
    registry: &'a SubmissionRegistry,
}

impl KernelHost for EpisodeHost<'_> {
    fn on_print(&mut self, values: usize) -> Result<(), String> {
        self.quota.charge(values).map_err(|msg| {
            tracing::debug!(
                used = self.quota.used(),
                allowed = self.quota.allowed(),
                "print quota exceeded"
            );
            msg.to_string()
        })
    }

    fn submit(&mut self, answer: Value) -> SubmitOutcome {
        self.registry.submit(answer)
    }
}

/// Runs fragments against one episode's namespace.
///
/// Owns the kernel and the print quota, so both live exactly as long as the
/// episode.
pub struct SandboxExecutor {
    kernel: Box<dyn Kernel>,
    quota: PrintQuota,
    max_chars: usize,
    registry: Arc<SubmissionRegistry>,
    abort: Option<watch::Receiver<bool>>,
}

impl SandboxExecutor {
    pub fn new(
        kernel: Box<dyn Kernel>,
        quota: PrintQuota,
        max_chars: usize,
        registry: Arc<SubmissionRegistry>,
    ) -> Self {
        Self {
            kernel,
            quota,
            max_chars,
            registry,
            abort: None,
        }
    }

    /// Abort any fragment in flight when the channel turns `true`.
    pub fn with_abort_signal(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn quota(&self) -> &PrintQuota {
        &self.quota
    }

    /// Run one fragment.
    ///
    /// Failures inside the fragment come back as `Ok` with `error` set. Only
    /// aborts and kernel breakage are returned as `Err`.
    pub async fn execute(&mut self, code: &str) -> SandboxResult<ExecutionReport> {
        let Self {
            kernel,
            quota,
            max_chars,
            registry,
            abort,
        } = self;

        let mut host = EpisodeHost {
            quota,
            registry: registry.as_ref(),
        };

        let fragment = match abort.as_mut() {
            Some(signal) => {
                if *signal.borrow() {
                    return Err(SandboxError::Aborted("abort requested".to_string()));
                }
                tokio::select! {
                    result = kernel.exec(code, &mut host) => result?,
                    _ = wait_for_abort(signal) => {
                        return Err(SandboxError::Aborted("abort requested".to_string()));
                    }
                }
            }
            None => kernel.exec(code, &mut host).await?,
        };

        Ok(ExecutionReport {
            output: truncate_output(fragment.stdout, *max_chars),
            error: fragment.error,
        })
    }

    pub async fn shutdown(&mut self) {
        self.kernel.shutdown().await;
    }
}

async fn wait_for_abort(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            // Sender gone: no abort can arrive any more.
            std::future::pending::<()>().await;
        }
    }
}
