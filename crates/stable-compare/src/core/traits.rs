//! The warehouse abstraction consumed by every comparison stage.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::Result;

use super::query::Query;
use super::table::{TableMetadata, TableRef};

/// One result row, keyed by output column name.
pub type Row = Map<String, Value>;

/// Read-only access to a data warehouse.
///
/// Implementations are shared between workers, so every call takes `&self`
/// and blocks only the calling task.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// List dataset ids in a project.
    async fn list_datasets(&self, project: &str) -> Result<Vec<String>>;

    /// List table ids in a dataset.
    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<String>>;

    /// Fetch row count, byte size and schema, scoped to one partition when
    /// `partition` is given.
    async fn get_table(&self, table: &TableRef, partition: Option<NaiveDate>)
        -> Result<TableMetadata>;

    /// Execute a query and return all rows.
    async fn query(&self, query: &Query) -> Result<Vec<Row>>;

    /// Estimate the bytes a query would process without running it.
    async fn dry_run(&self, query: &Query) -> Result<u64>;

    /// Backend name for log lines.
    fn name(&self) -> &str;
}
