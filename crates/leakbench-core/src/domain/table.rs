//! Column-oriented tables handed to the agent's namespace.

use serde::{Deserialize, Serialize};

use super::error::TableError;

/// Typed storage for one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    /// Continuous values. `NaN` marks a missing value.
    Float(Vec<f64>),
    /// Integer values (labels, counts).
    Int(Vec<i64>),
    /// Category codes; rendered as a categorical dtype inside the kernel.
    Category(Vec<u32>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Category(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the column should be treated as categorical by models.
    pub fn is_categorical(&self) -> bool {
        matches!(self, ColumnData::Category(_))
    }

    /// Numeric view of row `idx` (category codes and ints are widened).
    pub fn value_f64(&self, idx: usize) -> Option<f64> {
        match self {
            ColumnData::Float(v) => v.get(idx).copied(),
            ColumnData::Int(v) => v.get(idx).map(|x| *x as f64),
            ColumnData::Category(v) => v.get(idx).map(|x| f64::from(*x)),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// An ordered set of equal-length columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, enforcing unique names and a consistent row count.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        data: ColumnData,
    ) -> Result<Self, TableError> {
        self.push_column(name, data)?;
        Ok(self)
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        data: ColumnData,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if let Some(first) = self.columns.first() {
            let expected = first.data.len();
            if data.len() != expected {
                return Err(TableError::RaggedColumn {
                    name,
                    expected,
                    actual: data.len(),
                });
            }
        }
        self.columns.push(Column { name, data });
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Copy of the table without the named columns. Unknown names are ignored.
    pub fn without(&self, names: &[&str]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name.as_str()))
                .cloned()
                .collect(),
        }
    }
}
