//! Tools advertised to the model and their handlers.
//!
//! A [`ToolTable`] pairs each [`ToolDefinition`] with the handler that runs
//! it. The standard table exposes the sandbox as `python_expression` and the
//! submission registry as `submit_answer`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{HarnessError, Result};
use crate::model::ToolDefinition;
use crate::obs;
use crate::registry::{SubmissionRegistry, SubmitOutcome};
use crate::sandbox::SandboxExecutor;

pub const PYTHON_TOOL: &str = "python_expression";
pub const SUBMIT_TOOL: &str = "submit_answer";

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Payload returned to the model as the tool result.
    pub content: Value,
    /// The accepted answer, when this call submitted one.
    pub submitted: Option<Value>,
}

impl ToolOutcome {
    pub fn content(content: Value) -> Self {
        Self {
            content,
            submitted: None,
        }
    }
}

/// Runs one tool on behalf of the model.
///
/// Agent mistakes are returned as content; an `Err` aborts the episode.
#[async_trait]
pub trait ToolHandler: Send {
    async fn invoke(&mut self, input: &Value) -> Result<ToolOutcome>;
}

pub fn python_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: PYTHON_TOOL.to_string(),
        description: "Execute Python code in a persistent namespace holding train_df, \
                      test_df and present_leaks. Returns captured stdout and any error. \
                      print() output is limited."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string", "description": "Python code to run"}
            },
            "required": ["expression"]
        }),
    }
}

pub fn submit_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: SUBMIT_TOOL.to_string(),
        description: "Submit the final answer: a mapping with test-set probabilities under \
                      y_pred_proba plus an optional pipeline description. Only the first \
                      accepted submission counts."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"answer": {}},
            "required": ["answer"]
        }),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `python_expression`: runs the `expression` field in the sandbox.
pub struct PythonExpressionTool<'a> {
    executor: &'a mut SandboxExecutor,
    verbose: bool,
}

impl<'a> PythonExpressionTool<'a> {
    pub fn new(executor: &'a mut SandboxExecutor, verbose: bool) -> Self {
        Self { executor, verbose }
    }
}

#[async_trait]
impl ToolHandler for PythonExpressionTool<'_> {
    async fn invoke(&mut self, input: &Value) -> Result<ToolOutcome> {
        let Some(code) = input.get("expression").and_then(Value::as_str) else {
            return Ok(ToolOutcome::content(json!({
                "result": null,
                "error": "ERROR: python_expression requires a string field 'expression'",
            })));
        };

        obs::emit_fragment(code, self.verbose);
        let report = self.executor.execute(code).await?;
        obs::emit_fragment_output(&report, self.verbose);
        Ok(ToolOutcome::content(report.to_tool_content()))
    }
}

/// `submit_answer`: hands the `answer` field to the registry.
pub struct SubmitAnswerTool {
    registry: Arc<SubmissionRegistry>,
}

impl SubmitAnswerTool {
    pub fn new(registry: Arc<SubmissionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolHandler for SubmitAnswerTool {
    async fn invoke(&mut self, input: &Value) -> Result<ToolOutcome> {
        let answer = input.get("answer").cloned().unwrap_or(Value::Null);
        let outcome = self.registry.submit(answer);
        let content = outcome.to_tool_content();
        Ok(ToolOutcome {
            content,
            submitted: match outcome {
                SubmitOutcome::Accepted(answer) => Some(answer),
                SubmitOutcome::Rejected(_) => None,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// ToolTable
// ---------------------------------------------------------------------------

/// Tool definitions and their handlers, keyed by name.
#[derive(Default)]
pub struct ToolTable<'a> {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, Box<dyn ToolHandler + 'a>>,
}

impl<'a> ToolTable<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `python_expression` over `executor` and `submit_answer` over `registry`.
    pub fn standard(
        executor: &'a mut SandboxExecutor,
        registry: Arc<SubmissionRegistry>,
        verbose: bool,
    ) -> Result<Self> {
        let mut table = Self::new();
        table.register(
            python_tool_definition(),
            Box::new(PythonExpressionTool::new(executor, verbose)),
        )?;
        table.register(
            submit_tool_definition(),
            Box::new(SubmitAnswerTool::new(registry)),
        )?;
        Ok(table)
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Box<dyn ToolHandler + 'a>,
    ) -> Result<()> {
        if self.handlers.contains_key(&definition.name) {
            return Err(HarnessError::DuplicateTool(definition.name));
        }
        self.handlers.insert(definition.name.clone(), handler);
        self.definitions.push(definition);
        Ok(())
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn handler_mut(&mut self, name: &str) -> Option<&mut (dyn ToolHandler + 'a)> {
        self.handlers.get_mut(name).map(|h| h.as_mut())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{KernelAction, ScriptedKernel};
    use crate::sandbox::PrintQuota;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn invoke(&mut self, input: &Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome::content(input.clone()))
        }
    }

    fn executor(script: Vec<Vec<KernelAction>>, registry: Arc<SubmissionRegistry>) -> SandboxExecutor {
        SandboxExecutor::new(
            Box::new(ScriptedKernel::new(script)),
            PrintQuota::new(10),
            1000,
            registry,
        )
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = ToolTable::new();
        table.register(python_tool_definition(), Box::new(Echo)).unwrap();
        let err = table
            .register(python_tool_definition(), Box::new(Echo))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateTool(name) if name == PYTHON_TOOL));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_standard_table_advertises_both_tools() {
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(vec![], registry.clone());
        let table = ToolTable::standard(&mut exec, registry, false).unwrap();
        let names: Vec<&str> = table.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![PYTHON_TOOL, SUBMIT_TOOL]);
    }

    #[tokio::test]
    async fn test_python_tool_returns_result_and_error() {
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(
            vec![vec![
                KernelAction::print(1, "42"),
                KernelAction::Raise("ZeroDivisionError: division by zero".into()),
            ]],
            registry,
        );
        let mut tool = PythonExpressionTool::new(&mut exec, false);
        let outcome = tool.invoke(&json!({"expression": "print(42); 1/0"})).await.unwrap();
        assert_eq!(
            outcome.content,
            json!({"result": "42\n", "error": "ZeroDivisionError: division by zero"})
        );
        assert!(outcome.submitted.is_none());
    }

    #[tokio::test]
    async fn test_python_tool_without_expression_reports_error() {
        let registry = Arc::new(SubmissionRegistry::new());
        let mut exec = executor(vec![], registry);
        let mut tool = PythonExpressionTool::new(&mut exec, false);
        let outcome = tool.invoke(&json!({"code": "1"})).await.unwrap();
        assert!(outcome.content["error"].as_str().unwrap().contains("expression"));
    }

    #[tokio::test]
    async fn test_submit_tool_accepts_mapping() {
        let registry = Arc::new(SubmissionRegistry::new());
        let mut tool = SubmitAnswerTool::new(registry.clone());
        let outcome = tool
            .invoke(&json!({"answer": {"y_pred_proba": [0.3, 0.7]}}))
            .await
            .unwrap();
        assert_eq!(outcome.content, json!({"submitted": true}));
        assert_eq!(outcome.submitted, Some(json!({"y_pred_proba": [0.3, 0.7]})));
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_submit_tool_rejects_non_mapping() {
        let registry = Arc::new(SubmissionRegistry::new());
        let mut tool = SubmitAnswerTool::new(registry.clone());
        let outcome = tool.invoke(&json!({"answer": [0.3, 0.7]})).await.unwrap();
        assert_eq!(outcome.content["submitted"], json!(false));
        assert!(outcome.submitted.is_none());
        assert!(registry.is_empty());
    }
}
