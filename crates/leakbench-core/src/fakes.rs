//! Scripted fakes for the provider and kernel traits (testing only)
//!
//! `ScriptedProvider` replays canned model responses and `ScriptedKernel`
//! replays canned fragment behaviour, so the agent loop and the sandbox can be
//! exercised without network access or a Python interpreter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{
    ContentBlock, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError,
};
use crate::sandbox::{
    FragmentResult, Kernel, KernelHost, KernelLauncher, NamespaceSeed, SandboxError,
    SandboxResult,
};

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Replays a fixed list of provider results, one per call.
///
/// Once the script runs out every call gets a text-only reply, which ends an
/// agent loop as idle.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Dialogue sent with each call, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A response carrying the given tool calls as `(id, name, input)`.
pub fn tool_use_response(calls: &[(&str, &str, Value)]) -> ModelResponse {
    ModelResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        stop_reason: Some("tool_use".to_string()),
    }
}

/// A response with a single text segment and no tool calls.
pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: Some("end_turn".to_string()),
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.messages.to_vec());
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(text_response("nothing more to do")))
    }
}

// ---------------------------------------------------------------------------
// ScriptedKernel
// ---------------------------------------------------------------------------

/// One step of a scripted fragment.
#[derive(Debug, Clone)]
pub enum KernelAction {
    /// Charge `values` against the quota, then emit `text` plus a newline.
    Print { values: usize, text: String },
    /// Call the injected `submit_answer`.
    Submit(Value),
    /// Fail the fragment with this exception text.
    Raise(String),
    /// Raise an abort signal out of the fragment.
    Abort(String),
    /// Die mid-fragment; this and every later exec fail with `KernelExited`.
    Exit,
    /// Never finish.
    Pending,
}

impl KernelAction {
    pub fn print(values: usize, text: &str) -> Self {
        KernelAction::Print {
            values,
            text: text.to_string(),
        }
    }
}

/// Code strings executed by scripted kernels.
pub type CodeLog = Arc<Mutex<Vec<String>>>;

/// Kernel that runs one scripted action list per `exec` call.
#[derive(Debug, Default)]
pub struct ScriptedKernel {
    fragments: VecDeque<Vec<KernelAction>>,
    log: CodeLog,
    shut_down: bool,
}

impl ScriptedKernel {
    pub fn new(fragments: Vec<Vec<KernelAction>>) -> Self {
        Self {
            fragments: fragments.into(),
            log: CodeLog::default(),
            shut_down: false,
        }
    }

    pub fn with_log(mut self, log: CodeLog) -> Self {
        self.log = log;
        self
    }
}

#[async_trait]
impl Kernel for ScriptedKernel {
    async fn exec(
        &mut self,
        code: &str,
        host: &mut dyn KernelHost,
    ) -> SandboxResult<FragmentResult> {
        if self.shut_down {
            return Err(SandboxError::KernelExited);
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(code.to_string());

        let mut result = FragmentResult::default();
        for action in self.fragments.pop_front().unwrap_or_default() {
            match action {
                KernelAction::Print { values, text } => {
                    if let Err(msg) = host.on_print(values) {
                        result.error = Some(format!("RuntimeError: {msg}"));
                        break;
                    }
                    result.stdout.push_str(&text);
                    result.stdout.push('\n');
                }
                KernelAction::Submit(answer) => {
                    host.submit(answer);
                }
                KernelAction::Raise(error) => {
                    result.error = Some(error);
                    break;
                }
                KernelAction::Abort(reason) => return Err(SandboxError::Aborted(reason)),
                KernelAction::Exit => {
                    self.shut_down = true;
                    return Err(SandboxError::KernelExited);
                }
                KernelAction::Pending => std::future::pending::<()>().await,
            }
        }
        Ok(result)
    }

    async fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

/// Hands out one [`ScriptedKernel`] per launch.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Vec<Vec<KernelAction>>>>,
    seeds: Mutex<Vec<NamespaceSeed>>,
    log: CodeLog,
}

impl ScriptedLauncher {
    /// `scripts[i]` drives the kernel of the i-th launch.
    pub fn new(scripts: Vec<Vec<Vec<KernelAction>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            seeds: Mutex::new(Vec::new()),
            log: CodeLog::default(),
        }
    }

    /// Every fragment executed by any launched kernel.
    pub fn executed(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Namespaces the kernels were seeded with.
    pub fn seeds(&self) -> Vec<NamespaceSeed> {
        self.seeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl KernelLauncher for ScriptedLauncher {
    async fn launch(&self, seed: &NamespaceSeed) -> SandboxResult<Box<dyn Kernel>> {
        self.seeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(seed.clone());
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(
            ScriptedKernel::new(script).with_log(self.log.clone()),
        ))
    }
}
