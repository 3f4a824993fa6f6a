//! Python subprocess kernel.
//!
//! The interpreter runs `runner.py` and speaks newline-delimited JSON: the
//! harness sends `init` and `exec`, the runner answers with `ready`,
//! `host_call`, `exec_result` or `aborted`. Host calls are resolved against
//! the [`KernelHost`] passed to [`Kernel::exec`] before the fragment resumes.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::error::{SandboxError, SandboxResult};
use super::kernel::{FragmentResult, Kernel, KernelHost, KernelLauncher, NamespaceSeed};
use crate::domain::Table;
use crate::registry::SubmitOutcome;

const RUNNER: &str = include_str!("runner.py");

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HarnessMessage<'a> {
    Init {
        tables: &'a std::collections::BTreeMap<String, Table>,
        variables: &'a Map<String, Value>,
    },
    Exec {
        code: &'a str,
    },
    HostResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunnerEvent {
    Ready {
        #[serde(default)]
        pandas: bool,
    },
    HostCall {
        name: String,
        #[serde(default)]
        values: usize,
        #[serde(default)]
        answer: Value,
    },
    ExecResult {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        error: Option<String>,
    },
    Aborted {
        reason: String,
    },
}

/// A live interpreter holding one episode's namespace.
pub struct PythonKernel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    pandas: bool,
}

impl PythonKernel {
    /// Spawn `command` (split on whitespace) and seed its namespace.
    pub async fn start(command: &str, seed: &NamespaceSeed) -> SandboxResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| SandboxError::Spawn {
            command: command.to_string(),
            reason: "empty command".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(parts)
            .arg("-u")
            .arg("-c")
            .arg(RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SandboxError::Spawn {
                command: command.to_string(),
                reason: err.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| SandboxError::Spawn {
            command: command.to_string(),
            reason: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SandboxError::Spawn {
            command: command.to_string(),
            reason: "stdout not captured".to_string(),
        })?;

        let mut kernel = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            pandas: false,
        };
        kernel
            .send(&HarnessMessage::Init {
                tables: &seed.tables,
                variables: &seed.variables,
            })
            .await?;
        match kernel.read_event().await? {
            RunnerEvent::Ready { pandas } => kernel.pandas = pandas,
            other => {
                return Err(SandboxError::Protocol(format!(
                    "expected ready, got {other:?}"
                )))
            }
        }
        tracing::debug!(pandas = kernel.pandas, "python kernel ready");
        Ok(kernel)
    }

    /// Whether the namespace holds pandas DataFrames rather than plain dicts.
    pub fn has_pandas(&self) -> bool {
        self.pandas
    }

    async fn send(&mut self, message: &HarnessMessage<'_>) -> SandboxResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_event(&mut self) -> SandboxResult<RunnerEvent> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(SandboxError::KernelExited);
        }
        serde_json::from_str(line.trim()).map_err(|err| {
            SandboxError::Protocol(format!("invalid runner message: {err}; raw={}", line.trim()))
        })
    }

    async fn answer_host_call(
        &mut self,
        name: &str,
        values: usize,
        answer: Value,
        host: &mut dyn KernelHost,
    ) -> SandboxResult<()> {
        let reply = match name {
            "print" => match host.on_print(values) {
                Ok(()) => HarnessMessage::HostResult {
                    ok: true,
                    value: None,
                    error: None,
                },
                Err(msg) => HarnessMessage::HostResult {
                    ok: false,
                    value: None,
                    error: Some(msg),
                },
            },
            "submit_answer" => {
                let value = match host.submit(answer.clone()) {
                    SubmitOutcome::Accepted(stored) => json!({"answer": stored, "submitted": true}),
                    SubmitOutcome::Rejected(reason) => {
                        json!({"answer": answer, "submitted": false, "error": reason})
                    }
                };
                HarnessMessage::HostResult {
                    ok: true,
                    value: Some(value),
                    error: None,
                }
            }
            other => {
                return Err(SandboxError::Protocol(format!("unknown host call `{other}`")));
            }
        };
        self.send(&reply).await
    }
}

#[async_trait]
impl Kernel for PythonKernel {
    async fn exec(
        &mut self,
        code: &str,
        host: &mut dyn KernelHost,
    ) -> SandboxResult<FragmentResult> {
        self.send(&HarnessMessage::Exec { code }).await?;
        loop {
            match self.read_event().await? {
                RunnerEvent::HostCall {
                    name,
                    values,
                    answer,
                } => self.answer_host_call(&name, values, answer, host).await?,
                RunnerEvent::ExecResult { stdout, error } => {
                    return Ok(FragmentResult { stdout, error });
                }
                RunnerEvent::Aborted { reason } => return Err(SandboxError::Aborted(reason)),
                RunnerEvent::Ready { .. } => {
                    return Err(SandboxError::Protocol(
                        "unexpected ready during exec".to_string(),
                    ))
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::debug!(error = %err, "python kernel already gone");
        }
    }
}

impl Drop for PythonKernel {
    fn drop(&mut self) {
        self.child.start_kill().ok();
    }
}

/// Launches a [`PythonKernel`] per episode.
#[derive(Debug, Clone)]
pub struct PythonLauncher {
    command: String,
}

impl PythonLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl KernelLauncher for PythonLauncher {
    async fn launch(&self, seed: &NamespaceSeed) -> SandboxResult<Box<dyn Kernel>> {
        let kernel = PythonKernel::start(&self.command, seed).await?;
        Ok(Box::new(kernel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_events_parse() {
        let ev: RunnerEvent =
            serde_json::from_str(r#"{"type":"host_call","name":"print","values":3}"#).unwrap();
        assert!(matches!(ev, RunnerEvent::HostCall { values: 3, .. }));

        let ev: RunnerEvent =
            serde_json::from_str(r#"{"type":"exec_result","stdout":"hi\n","error":null}"#)
                .unwrap();
        match ev {
            RunnerEvent::ExecResult { stdout, error } => {
                assert_eq!(stdout, "hi\n");
                assert!(error.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_host_result_omits_empty_fields() {
        let msg = HarnessMessage::HostResult {
            ok: true,
            value: None,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "host_result", "ok": true})
        );
    }

    #[test]
    fn test_exec_message_shape() {
        let msg = HarnessMessage::Exec { code: "1 + 1" };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "exec", "code": "1 + 1"})
        );
    }

    #[test]
    fn test_runner_source_embedded() {
        assert!(RUNNER.contains("def submit_answer"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let err = PythonKernel::start("definitely-not-a-python-binary", &NamespaceSeed::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
