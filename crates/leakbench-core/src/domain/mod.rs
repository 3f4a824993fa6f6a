//! Domain models for LeakBench.
//!
//! Canonical definitions for the core entities:
//! - `Table`: column-oriented train/test data
//! - `ProblemInstance`: one episode's tables, labels and leak spec
//! - `HarnessError`: failures that abort an episode

pub mod error;
pub mod problem;
pub mod table;

pub use error::{HarnessError, Result, TableError};
pub use problem::{LeakSpec, ProblemInstance, ProblemProvider};
pub use table::{Column, ColumnData, Table};
