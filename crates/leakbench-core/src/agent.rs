//! Bounded tool-calling dialogue with a model.
//!
//! Each step sends the whole dialogue plus the tool definitions, dispatches
//! every tool call in the reply and appends the assistant turn with its tool
//! results. The loop ends on an accepted submission, on a reply without tool
//! calls, or when the step budget is spent.

use serde::Serialize;
use serde_json::Value;

use crate::config::HarnessConfig;
use crate::domain::{HarnessError, Result};
use crate::model::{
    call_with_retry, ContentBlock, Message, ModelProvider, ModelRequest, RetryPolicy, Role,
};
use crate::obs;
use crate::tools::ToolTable;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A tool call's submission was accepted.
    Submitted,
    /// The model replied without any tool call.
    Idle,
    /// `max_steps` model calls were made without a submission.
    StepsExhausted,
    /// The sandbox kernel died or broke protocol while running agent code.
    KernelFailed,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Termination::Submitted => "submitted",
            Termination::Idle => "idle",
            Termination::StepsExhausted => "steps_exhausted",
            Termination::KernelFailed => "kernel_failed",
        };
        f.write_str(s)
    }
}

/// Append-only conversation with the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogueState {
    messages: Vec<Message>,
}

impl DialogueState {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user_text(prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Everything the loop produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub termination: Termination,
    /// Answer returned by the submitting tool call, if any.
    pub submission: Option<Value>,
    /// Model calls made.
    pub steps: u32,
    /// Tool calls dispatched to a handler.
    pub tool_calls: u32,
    pub dialogue: DialogueState,
    /// Sandbox failure text when `termination` is `KernelFailed`.
    pub kernel_failure: Option<String>,
}

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_steps: u32,
    pub max_tokens: u32,
    pub verbose: bool,
    pub retry: RetryPolicy,
}

impl AgentSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_steps: config.max_steps,
            max_tokens: config.max_tokens,
            verbose: config.verbose,
            retry: config.retry.clone(),
        }
    }
}

/// Drives one dialogue against `provider`.
pub struct AgentLoop<'p> {
    provider: &'p dyn ModelProvider,
    settings: AgentSettings,
}

impl<'p> AgentLoop<'p> {
    pub fn new(provider: &'p dyn ModelProvider, settings: AgentSettings) -> Self {
        Self { provider, settings }
    }

    /// Run the dialogue seeded with `prompt`.
    ///
    /// Only provider failures (after retries) and abort requests are errors.
    /// A broken kernel ends the dialogue as `KernelFailed`; everything else
    /// the agent does wrong becomes tool feedback.
    pub async fn run(&self, prompt: &str, tools: &mut ToolTable<'_>) -> Result<AgentOutcome> {
        let settings = &self.settings;
        let mut dialogue = DialogueState::new(prompt);
        let mut tool_calls = 0u32;

        for step in 1..=settings.max_steps {
            obs::emit_step(step, settings.max_steps, settings.verbose);

            let request = ModelRequest {
                model: &settings.model,
                max_tokens: settings.max_tokens,
                tools: tools.definitions(),
                messages: dialogue.messages(),
            };
            let response = call_with_retry(self.provider, &request, &settings.retry).await?;

            let mut has_tool_use = false;
            let mut submitted = None;
            let mut results = Vec::new();
            let mut kernel_failure = None;

            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => obs::emit_assistant_text(text, settings.verbose),
                    ContentBlock::ToolUse { id, name, input } => {
                        has_tool_use = true;
                        // Skipped calls get no tool_result. The Messages API
                        // rejects the next request when such a call is mixed
                        // with handled ones, and that rejection is fatal.
                        let Some(handler) = tools.handler_mut(name) else {
                            obs::emit_unknown_tool(name);
                            continue;
                        };
                        let outcome = match handler.invoke(input).await {
                            Ok(outcome) => outcome,
                            Err(HarnessError::Sandbox(err)) if !err.is_abort() => {
                                obs::emit_kernel_failed(&err);
                                kernel_failure = Some(err.to_string());
                                break;
                            }
                            Err(err) => return Err(err),
                        };
                        tool_calls += 1;
                        if outcome.submitted.is_some() {
                            submitted = outcome.submitted;
                        }
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: outcome.content.to_string(),
                        });
                    }
                    ContentBlock::ToolResult { .. } | ContentBlock::Unsupported => {}
                }
            }

            dialogue.push(assistant_turn(response.content));

            if kernel_failure.is_some() {
                return Ok(AgentOutcome {
                    termination: Termination::KernelFailed,
                    submission: None,
                    steps: step,
                    tool_calls,
                    dialogue,
                    kernel_failure,
                });
            }

            if !has_tool_use {
                obs::emit_idle(step, settings.verbose);
                return Ok(AgentOutcome {
                    termination: Termination::Idle,
                    submission: None,
                    steps: step,
                    tool_calls,
                    dialogue,
                    kernel_failure: None,
                });
            }

            if !results.is_empty() {
                dialogue.push(Message {
                    role: Role::User,
                    content: results,
                });
            }

            if let Some(answer) = submitted {
                obs::emit_agent_submitted(step, settings.verbose);
                return Ok(AgentOutcome {
                    termination: Termination::Submitted,
                    submission: Some(answer),
                    steps: step,
                    tool_calls,
                    dialogue,
                    kernel_failure: None,
                });
            }
        }

        Ok(AgentOutcome {
            termination: Termination::StepsExhausted,
            submission: None,
            steps: settings.max_steps,
            tool_calls,
            dialogue,
            kernel_failure: None,
        })
    }
}

/// The assistant's reply as recorded in the dialogue, minus blocks the
/// protocol cannot echo back.
fn assistant_turn(content: Vec<ContentBlock>) -> Message {
    Message {
        role: Role::Assistant,
        content: content
            .into_iter()
            .filter(|b| !matches!(b, ContentBlock::Unsupported))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{text_response, tool_use_response, ScriptedProvider};
    use crate::model::ProviderError;
    use crate::registry::SubmissionRegistry;
    use crate::sandbox::{PrintQuota, SandboxExecutor};
    use crate::fakes::ScriptedKernel;
    use serde_json::json;
    use std::sync::Arc;

    fn settings(max_steps: u32) -> AgentSettings {
        AgentSettings {
            model: "test-model".into(),
            max_steps,
            max_tokens: 100,
            verbose: false,
            retry: RetryPolicy {
                max_retries: 5,
                base_delay_ms: 1,
                max_jitter_ms: 0,
            },
        }
    }

    fn executor(registry: Arc<SubmissionRegistry>) -> SandboxExecutor {
        SandboxExecutor::new(
            Box::new(ScriptedKernel::new(vec![])),
            PrintQuota::new(10),
            100,
            registry,
        )
    }

    #[test]
    fn test_dialogue_starts_with_prompt() {
        let d = DialogueState::new("solve it");
        assert_eq!(d.len(), 1);
        assert_eq!(d.messages()[0], Message::user_text("solve it"));
    }

    #[test]
    fn test_termination_names() {
        assert_eq!(Termination::KernelFailed.to_string(), "kernel_failed");
        assert_eq!(
            serde_json::to_value(Termination::KernelFailed).unwrap(),
            json!("kernel_failed")
        );
    }

    #[test]
    fn test_assistant_turn_drops_unsupported_blocks() {
        let msg = assistant_turn(vec![
            ContentBlock::Unsupported,
            ContentBlock::Text { text: "hi".into() },
        ]);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, vec![ContentBlock::Text { text: "hi".into() }]);
    }

    #[tokio::test]
    async fn test_text_only_reply_ends_idle() {
        let provider = ScriptedProvider::new(vec![Ok(text_response("I give up"))]);
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(registry.clone());
        let mut tools = ToolTable::standard(&mut exec, registry, false).unwrap();

        let outcome = AgentLoop::new(&provider, settings(5))
            .run("task", &mut tools)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Idle);
        assert!(outcome.submission.is_none());
        assert_eq!(outcome.steps, 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_accepted_submission_terminates() {
        let provider = ScriptedProvider::new(vec![Ok(tool_use_response(&[(
            "t1",
            "submit_answer",
            json!({"answer": {"y_pred_proba": [0.5]}}),
        )]))]);
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(registry.clone());
        let mut tools = ToolTable::standard(&mut exec, registry, false).unwrap();

        let outcome = AgentLoop::new(&provider, settings(5))
            .run("task", &mut tools)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Submitted);
        assert_eq!(outcome.submission, Some(json!({"y_pred_proba": [0.5]})));
        // prompt, assistant turn, tool results
        assert_eq!(outcome.dialogue.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_skipped() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_use_response(&[("t1", "web_search", json!({"q": "x"}))])),
            Ok(text_response("done")),
        ]);
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(registry.clone());
        let mut tools = ToolTable::standard(&mut exec, registry, false).unwrap();

        let outcome = AgentLoop::new(&provider, settings(5))
            .run("task", &mut tools)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Idle);
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_provider_error_propagates() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::fatal("bad request"))]);
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(registry.clone());
        let mut tools = ToolTable::standard(&mut exec, registry, false).unwrap();

        let err = AgentLoop::new(&provider, settings(5))
            .run("task", &mut tools)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad request"));
    }
}
