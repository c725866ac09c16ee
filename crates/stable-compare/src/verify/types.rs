//! Result types for table checks and whole runs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::table::{TablePair, TableRef};

use super::bytes::ByteAttribution;
use super::content::ContentDiff;
use super::schema_diff::SchemaDiff;

/// Last stage a table check completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Enumerated,
    CoarseChecked,
    SchemaChecked,
    ByteAttributed,
    ContentChecked,
    Reported,
}

impl std::fmt::Display for CheckStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckStage::Enumerated => "enumerated",
            CheckStage::CoarseChecked => "coarse_checked",
            CheckStage::SchemaChecked => "schema_checked",
            CheckStage::ByteAttributed => "byte_attributed",
            CheckStage::ContentChecked => "content_checked",
            CheckStage::Reported => "reported",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of checking one table pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableComparison {
    /// `dataset.table`.
    pub table: String,
    pub prod: TableRef,
    pub stage: TableRef,

    /// Last stage reached.
    pub stage_reached: CheckStage,

    pub prod_rows: u64,
    pub stage_rows: u64,
    pub prod_bytes: u64,
    pub stage_bytes: u64,

    /// Row count discrepancy, e.g. "stage expected 1.50K more rows".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_difference: Option<String>,

    /// Byte size discrepancy when row counts match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_difference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_diff: Option<SchemaDiff>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_attribution: Option<ByteAttribution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_diff: Option<ContentDiff>,

    /// Gross (row or byte) difference observed.
    pub different: bool,

    /// Unresolved content difference found.
    pub has_problem: bool,

    /// Error that aborted the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl TableComparison {
    /// A check that has not run any stage yet.
    pub fn new(pair: &TablePair) -> Self {
        Self {
            table: pair.name(),
            prod: pair.prod.clone(),
            stage: pair.stage.clone(),
            stage_reached: CheckStage::Enumerated,
            prod_rows: 0,
            stage_rows: 0,
            prod_bytes: 0,
            stage_bytes: 0,
            row_difference: None,
            byte_difference: None,
            schema_diff: None,
            byte_attribution: None,
            content_diff: None,
            different: false,
            has_problem: false,
            error: None,
            duration_ms: 0,
        }
    }

    /// A check aborted by `error`.
    pub fn failed(pair: &TablePair, error: impl ToString) -> Self {
        let mut comparison = Self::new(pair);
        comparison.error = Some(error.to_string());
        comparison
    }

    /// True when the check failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// True when the check completed without an unresolved difference.
    pub fn is_in_sync(&self) -> bool {
        !self.has_problem && !self.is_failed()
    }
}

/// Result of a comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Partition compared.
    pub partition_date: NaiveDate,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Content queries were only estimated.
    pub dry_run: bool,

    pub tables_total: usize,
    pub tables_in_sync: usize,
    pub tables_with_differences: usize,
    pub tables_failed: usize,

    /// Per-table results, sorted by table name.
    pub tables: Vec<TableComparison>,
}

impl ComparisonReport {
    /// Build from per-table results, filling in the counters.
    pub fn new(
        run_id: String,
        partition_date: NaiveDate,
        started_at: DateTime<Utc>,
        dry_run: bool,
        mut tables: Vec<TableComparison>,
    ) -> Self {
        tables.sort_by(|a, b| a.table.cmp(&b.table));
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        Self {
            run_id,
            partition_date,
            started_at,
            completed_at,
            duration_seconds,
            dry_run,
            tables_total: tables.len(),
            tables_in_sync: tables.iter().filter(|t| t.is_in_sync()).count(),
            tables_with_differences: tables.iter().filter(|t| t.has_problem).count(),
            tables_failed: tables.iter().filter(|t| t.is_failed()).count(),
            tables,
        }
    }

    /// True when any table has an unresolved difference or failed.
    pub fn has_problems(&self) -> bool {
        self.tables_with_differences > 0 || self.tables_failed > 0
    }

    /// Process exit code: 1 on problems, 0 otherwise.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_problems())
    }

    /// Names of tables with problems.
    pub fn problem_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.is_in_sync())
            .map(|t| t.table.as_str())
            .collect()
    }
}
