//! Problem instances: one evaluation episode's data and leakage ground truth.

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::table::Table;

/// Names the leakage channels planted in a problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeakSpec {
    /// Columns whose values are derived from the label.
    pub leak_columns: Vec<String>,
    /// Label column. Present in both tables, never a valid feature.
    pub target_column: String,
}

impl LeakSpec {
    pub fn new(leak_columns: Vec<String>) -> Self {
        Self {
            leak_columns,
            target_column: "target".to_string(),
        }
    }
}

/// One evaluation episode's immutable inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemInstance {
    pub train: Table,
    pub test: Table,
    /// Ground-truth labels aligned with `test` row order.
    pub test_labels: Vec<u8>,
    pub spec: LeakSpec,
}

impl ProblemInstance {
    /// Leak columns that actually appear in either table, in declaration order.
    pub fn present_leaks(&self) -> Vec<String> {
        self.spec
            .leak_columns
            .iter()
            .filter(|c| self.train.contains(c) || self.test.contains(c))
            .cloned()
            .collect()
    }
}

/// Source of problem instances.
pub trait ProblemProvider: Send + Sync {
    /// Build a fresh instance. The same seed must yield the same instance.
    fn make_problem(&self, seed: u64, n_train: usize, n_test: usize) -> Result<ProblemInstance>;
}
