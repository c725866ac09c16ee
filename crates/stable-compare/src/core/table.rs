//! Table identifiers and per-partition metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::schema::TableFieldSchema;

/// Fully qualified reference to a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Project id.
    pub project: String,
    /// Dataset id.
    pub dataset: String,
    /// Table id.
    pub table: String,
}

impl TableRef {
    /// Create a new table reference.
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `dataset.table`, the name used by allow-lists and per-table settings.
    pub fn short_name(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// A prod table and the stage table mirroring it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    /// Production side.
    pub prod: TableRef,
    /// Staging side.
    pub stage: TableRef,
}

impl TablePair {
    /// Derive the stage table from a prod table: same dataset and table name
    /// under the stage project, with the dataset suffixed.
    pub fn derive(prod: TableRef, stage_project: &str, stage_dataset_suffix: &str) -> Self {
        let stage = TableRef::new(
            stage_project,
            format!("{}{}", prod.dataset, stage_dataset_suffix),
            prod.table.clone(),
        );
        Self { prod, stage }
    }

    /// Name used in log lines and reports.
    pub fn name(&self) -> String {
        self.prod.short_name()
    }
}

impl fmt::Display for TablePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.prod, self.stage)
    }
}

/// Metadata for one table partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Rows in the partition.
    pub num_rows: u64,
    /// Logical bytes in the partition.
    pub num_bytes: u64,
    /// Column schema of the table.
    pub schema: Vec<TableFieldSchema>,
}

impl TableMetadata {
    /// Top-level column names.
    pub fn column_names(&self) -> Vec<String> {
        self.schema.iter().map(|f| f.name.clone()).collect()
    }
}
