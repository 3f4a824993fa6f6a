//! Structured observability hooks for LeakBench episodes.
//!
//! This module provides:
//! - Episode-scoped tracing spans via the `EpisodeSpan` RAII guard
//! - Emission functions for agent, sandbox, submission and grading events
//!
//! Dialogue events (steps, assistant text, code fragments and their output)
//! are emitted at `info!` when the run is verbose and at `debug!` otherwise.
//! Set `RUST_LOG` to override, or pass `--json` for JSON lines.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::grading::GradingResult;
use crate::model::ProviderError;
use crate::sandbox::{ExecutionReport, SandboxError};

/// `info!` when `$verbose`, `debug!` otherwise.
macro_rules! dialogue_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// RAII guard that enters an episode-scoped span for the duration of an
/// episode.
///
/// ```ignore
/// let _span = EpisodeSpan::enter(&episode_id, 3, "agent");
/// // everything logged now carries episode_id, run and mode
/// ```
pub struct EpisodeSpan {
    _span: tracing::span::EnteredSpan,
}

impl EpisodeSpan {
    pub fn enter(episode_id: &str, run_index: u32, mode: &str) -> Self {
        Self {
            _span: episode_span(episode_id, run_index, mode).entered(),
        }
    }
}

/// The episode span itself, for instrumenting async episodes.
pub fn episode_span(episode_id: &str, run_index: u32, mode: &str) -> tracing::Span {
    tracing::info_span!(
        "leakbench.episode",
        episode_id = %episode_id,
        run = run_index,
        mode = %mode
    )
}

/// Emit event: episode started.
pub fn emit_episode_started(seed: u64, n_train: usize, n_test: usize, present_leaks: &[String]) {
    info!(
        event = "episode.started",
        seed = seed,
        n_train = n_train,
        n_test = n_test,
        present_leaks = ?present_leaks,
    );
}

/// Emit event: episode graded.
pub fn emit_episode_graded(result: &GradingResult, duration_ms: u64) {
    let failed: Vec<&str> = result.failed_checks().iter().map(|c| c.as_str()).collect();
    info!(
        event = "episode.graded",
        passed = result.passed,
        auc = result.auc,
        failed = ?failed,
        duration_ms = duration_ms,
    );
}

/// Emit event: the agent loop began a step.
pub fn emit_step(step: u32, max_steps: u32, verbose: bool) {
    dialogue_event!(verbose, event = "agent.step", step = step, max_steps = max_steps);
}

/// Emit event: assistant text segment.
pub fn emit_assistant_text(text: &str, verbose: bool) {
    dialogue_event!(verbose, event = "agent.text", text = %text);
}

/// Emit event: the model replied without tool calls.
pub fn emit_idle(step: u32, verbose: bool) {
    dialogue_event!(verbose, event = "agent.idle", step = step, "no tool use; stopping");
}

/// Emit event: a tool call submitted an accepted answer.
pub fn emit_agent_submitted(step: u32, verbose: bool) {
    dialogue_event!(verbose, event = "agent.submitted", step = step);
}

/// Emit event: the model called a tool nobody handles.
pub fn emit_unknown_tool(name: &str) {
    debug!(event = "agent.unknown_tool", tool = %name);
}

/// Emit event: the kernel died or broke protocol mid-dialogue (warning level).
pub fn emit_kernel_failed(error: &SandboxError) {
    warn!(event = "sandbox.kernel_failed", error = %error);
}

/// Emit event: code fragment about to run.
pub fn emit_fragment(code: &str, verbose: bool) {
    dialogue_event!(verbose, event = "sandbox.fragment", code = %code);
}

/// Emit event: code fragment finished.
pub fn emit_fragment_output(report: &ExecutionReport, verbose: bool) {
    dialogue_event!(
        verbose,
        event = "sandbox.output",
        output = %report.output,
        error = ?report.error,
    );
}

/// Emit event: transient provider failure, retrying after `delay` (warning level).
pub fn emit_provider_retry(provider: &str, attempt: u32, delay: Duration, error: &ProviderError) {
    warn!(
        event = "provider.retry",
        provider = %provider,
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
    );
}

/// Emit event: submission stored in the registry.
pub fn emit_submission_accepted<'a>(keys: impl Iterator<Item = &'a str>) {
    let keys: Vec<&str> = keys.collect();
    info!(event = "submission.accepted", keys = ?keys);
}

/// Emit event: a later submission was answered with the stored one.
pub fn emit_submission_replayed() {
    debug!(event = "submission.replayed");
}
