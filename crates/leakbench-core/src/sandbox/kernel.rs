//! The evaluation boundary between the harness and agent-written code.
//!
//! A [`Kernel`] owns a persistent namespace and runs code fragments in it.
//! Everything the fragment may do to the outside world goes through the
//! [`KernelHost`] capabilities injected for the duration of the call.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::error::SandboxResult;
use crate::domain::{ProblemInstance, Table};
use crate::registry::SubmitOutcome;

/// Captured result of one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentResult {
    /// Everything the fragment printed, untruncated.
    pub stdout: String,
    /// Exception text when the fragment failed.
    pub error: Option<String>,
}

/// Capabilities a running fragment can call back into.
pub trait KernelHost: Send {
    /// Charge `values` printed values against the output quota.
    ///
    /// An `Err` is raised inside the fragment as an exception.
    fn on_print(&mut self, values: usize) -> Result<(), String>;

    /// Submit an answer through the episode's registry.
    fn submit(&mut self, answer: Value) -> SubmitOutcome;
}

/// A persistent code namespace.
#[async_trait]
pub trait Kernel: Send {
    /// Run `code` to completion against the namespace.
    ///
    /// Exceptions raised by the code are returned in
    /// [`FragmentResult::error`]; an `Err` means the kernel itself failed or
    /// an abort was requested.
    async fn exec(&mut self, code: &str, host: &mut dyn KernelHost)
        -> SandboxResult<FragmentResult>;

    /// Release the namespace. Further calls to `exec` are invalid.
    async fn shutdown(&mut self);
}

/// Initial namespace contents.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NamespaceSeed {
    /// Tables bound as data frames, keyed by variable name.
    pub tables: BTreeMap<String, Table>,
    /// Plain JSON variables.
    pub variables: Map<String, Value>,
}

impl NamespaceSeed {
    /// `train_df`, `test_df` and the `present_leaks` hint.
    pub fn for_problem(problem: &ProblemInstance) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert("train_df".to_string(), problem.train.clone());
        tables.insert("test_df".to_string(), problem.test.clone());

        let mut variables = Map::new();
        variables.insert(
            "present_leaks".to_string(),
            Value::from(problem.present_leaks()),
        );
        Self { tables, variables }
    }
}

/// Creates one fresh kernel per episode.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(&self, seed: &NamespaceSeed) -> SandboxResult<Box<dyn Kernel>>;
}
