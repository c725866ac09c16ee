//! In-memory warehouse backed by JSON rows.
//!
//! Evaluates the structured [`Query`] shapes directly instead of parsing SQL.
//! Byte accounting follows the columnar model of the real warehouse: a
//! column costs the serialized size of its non-null values, and a query costs
//! every column it references, including the partition filter column.
//! Metadata partitions use the table's own partition column; queries filter
//! on the column they name.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use crate::core::query::{Query, Selection, DOCUMENT_ID_FIELD, PAYLOAD_FIELD};
use crate::core::schema::TableFieldSchema;
use crate::core::table::{TableMetadata, TableRef};
use crate::core::traits::{Row, Warehouse};
use crate::error::{CompareError, Result};

/// One stored table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: Vec<TableFieldSchema>,
    pub rows: Vec<Row>,
    /// Column whose date prefix decides the partition of a row.
    pub partition_column: String,
    /// Bytes reported by metadata on top of the column bytes.
    pub extra_bytes: u64,
}

/// One table in a fixture file.
#[derive(Debug, Deserialize)]
struct FixtureTable {
    project: String,
    dataset: String,
    table: String,
    schema: Vec<TableFieldSchema>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default = "default_partition_column")]
    partition_column: String,
    #[serde(default)]
    extra_bytes: u64,
}

fn default_partition_column() -> String {
    "submission_timestamp".to_string()
}

/// Fixture file layout: `{"tables": [...]}`.
#[derive(Debug, Deserialize)]
struct Fixture {
    tables: Vec<FixtureTable>,
}

/// Warehouse holding tables in process memory.
#[derive(Default)]
pub struct MemoryWarehouse {
    tables: RwLock<HashMap<TableRef, MemoryTable>>,
    failing_tables: RwLock<HashSet<TableRef>>,
    failing_projects: RwLock<HashSet<String>>,
}

impl MemoryWarehouse {
    /// Create an empty warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load tables from a JSON fixture file.
    pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_fixture_json(&content)
    }

    /// Parse tables from fixture JSON.
    pub fn from_fixture_json(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let warehouse = Self::new();
        for t in fixture.tables {
            warehouse.insert(
                TableRef::new(t.project, t.dataset, t.table),
                MemoryTable {
                    schema: t.schema,
                    rows: t.rows,
                    partition_column: t.partition_column,
                    extra_bytes: t.extra_bytes,
                },
            );
        }
        Ok(warehouse)
    }

    /// Add (or replace) a table partitioned on `submission_timestamp`.
    pub fn add_table(&self, table: TableRef, schema: Vec<TableFieldSchema>, rows: Vec<Row>) {
        self.insert(
            table,
            MemoryTable {
                schema,
                rows,
                partition_column: default_partition_column(),
                extra_bytes: 0,
            },
        );
    }

    /// Add (or replace) a fully specified table.
    pub fn insert(&self, table: TableRef, data: MemoryTable) {
        write_lock(&self.tables).insert(table, data);
    }

    /// Report `bytes` more in metadata than the columns account for.
    pub fn set_extra_bytes(&self, table: &TableRef, bytes: u64) {
        if let Some(t) = write_lock(&self.tables).get_mut(table) {
            t.extra_bytes = bytes;
        }
    }

    /// Make every call touching `table` fail.
    pub fn fail_table(&self, table: TableRef) {
        write_lock(&self.failing_tables).insert(table);
    }

    /// Make dataset listing in `project` fail.
    pub fn fail_project(&self, project: &str) {
        write_lock(&self.failing_projects).insert(project.to_string());
    }

    fn with_table<T>(&self, table: &TableRef, f: impl FnOnce(&MemoryTable) -> T) -> Result<T> {
        if read_lock(&self.failing_tables).contains(table) {
            return Err(CompareError::remote_metadata(
                format!("get table {}", table),
                "injected failure",
            ));
        }
        let tables = read_lock(&self.tables);
        let data = tables.get(table).ok_or_else(|| {
            CompareError::remote_metadata(
                format!("get table {}", table),
                format!("Not found: Table {}", table),
            )
        })?;
        Ok(f(data))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Storage size of a single value.
fn value_bytes(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::String(s) => s.len() as u64,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        other => other.to_string().len() as u64,
    }
}

/// Partition date of a row, read from the leading `YYYY-MM-DD` of the
/// partition column.
fn row_date(row: &Row, partition_column: &str) -> Option<NaiveDate> {
    let value = row.get(partition_column)?.as_str()?;
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()
}

impl MemoryTable {
    fn partition_rows<'a>(
        &'a self,
        column: &'a str,
        date: Option<NaiveDate>,
    ) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows
            .iter()
            .filter(move |row| date.map_or(true, |d| row_date(row, column) == Some(d)))
    }

    fn metadata_rows(&self, date: Option<NaiveDate>) -> impl Iterator<Item = &Row> {
        self.partition_rows(&self.partition_column, date)
    }

    fn matching_rows<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Row> + 'a {
        self.partition_rows(&query.partition_column, Some(query.partition_date))
            .filter(move |row| match &query.sample {
                Some(sample) => {
                    let bucket = row.get(&sample.column).and_then(Value::as_u64);
                    bucket == Some(u64::from(sample.bucket))
                }
                None => true,
            })
    }

    fn column_bytes<'a>(
        &self,
        rows: impl Iterator<Item = &'a Row>,
        columns: &BTreeSet<&str>,
    ) -> u64 {
        rows.map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map_or(0, value_bytes))
                .sum::<u64>()
        })
        .sum()
    }

    fn schema_columns(&self) -> BTreeSet<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn list_datasets(&self, project: &str) -> Result<Vec<String>> {
        if read_lock(&self.failing_projects).contains(project) {
            return Err(CompareError::remote_metadata(
                format!("list datasets in {}", project),
                "injected failure",
            ));
        }
        let datasets: BTreeSet<String> = read_lock(&self.tables)
            .keys()
            .filter(|t| t.project == project)
            .map(|t| t.dataset.clone())
            .collect();
        Ok(datasets.into_iter().collect())
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<String>> {
        let tables: BTreeSet<String> = read_lock(&self.tables)
            .keys()
            .filter(|t| t.project == project && t.dataset == dataset)
            .map(|t| t.table.clone())
            .collect();
        Ok(tables.into_iter().collect())
    }

    async fn get_table(
        &self,
        table: &TableRef,
        partition: Option<NaiveDate>,
    ) -> Result<TableMetadata> {
        self.with_table(table, |data| {
            let columns = data.schema_columns();
            TableMetadata {
                num_rows: data.metadata_rows(partition).count() as u64,
                num_bytes: data.column_bytes(data.metadata_rows(partition), &columns)
                    + data.extra_bytes,
                schema: data.schema.clone(),
            }
        })
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>> {
        self.with_table(&query.table, |data| {
            data.matching_rows(query)
                .map(|row| {
                    let mut out = Row::new();
                    match &query.selection {
                        Selection::Column(column) => {
                            out.insert(
                                column.clone(),
                                row.get(column).cloned().unwrap_or(Value::Null),
                            );
                        }
                        Selection::Documents { id_column } => {
                            out.insert(
                                DOCUMENT_ID_FIELD.to_string(),
                                row.get(id_column).cloned().unwrap_or(Value::Null),
                            );
                            out.insert(
                                PAYLOAD_FIELD.to_string(),
                                Value::String(Value::Object(row.clone()).to_string()),
                            );
                        }
                    }
                    out
                })
                .collect()
        })
    }

    async fn dry_run(&self, query: &Query) -> Result<u64> {
        self.with_table(&query.table, |data| {
            let columns: BTreeSet<&str> = match &query.selection {
                Selection::Column(column) => {
                    let mut referenced =
                        BTreeSet::from([column.as_str(), query.partition_column.as_str()]);
                    if let Some(sample) = &query.sample {
                        referenced.insert(sample.column.as_str());
                    }
                    referenced
                }
                Selection::Documents { .. } => data.schema_columns(),
            };
            let rows =
                data.partition_rows(&query.partition_column, Some(query.partition_date));
            data.column_bytes(rows, &columns)
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    fn warehouse() -> (MemoryWarehouse, TableRef) {
        let table = TableRef::new("prod", "telemetry_stable", "event_v4");
        let wh = MemoryWarehouse::new();
        wh.add_table(
            table.clone(),
            vec![
                TableFieldSchema::leaf("submission_timestamp", "TIMESTAMP", "NULLABLE"),
                TableFieldSchema::leaf("document_id", "STRING", "NULLABLE"),
                TableFieldSchema::leaf("sample_id", "INT64", "NULLABLE"),
            ],
            vec![
                row(json!({
                    "submission_timestamp": "2020-01-01T10:00:00Z",
                    "document_id": "abc",
                    "sample_id": 1
                })),
                row(json!({
                    "submission_timestamp": "2020-01-01T11:00:00Z",
                    "document_id": "de",
                    "sample_id": 2
                })),
                row(json!({
                    "submission_timestamp": "2020-01-02T10:00:00Z",
                    "document_id": "f",
                    "sample_id": 1
                })),
            ],
        );
        (wh, table)
    }

    #[tokio::test]
    async fn test_partition_metadata() {
        let (wh, table) = warehouse();
        let meta = wh.get_table(&table, Some(date())).await.unwrap();
        assert_eq!(meta.num_rows, 2);
        // 2 timestamps of 20 bytes, ids of 3 and 2 bytes, 2 integers of 8 bytes
        assert_eq!(meta.num_bytes, 40 + 5 + 16);

        let whole = wh.get_table(&table, None).await.unwrap();
        assert_eq!(whole.num_rows, 3);
    }

    #[tokio::test]
    async fn test_dry_run_counts_partition_column() {
        let (wh, table) = warehouse();
        let ts = Query::column(&table, "submission_timestamp", "submission_timestamp", date());
        assert_eq!(wh.dry_run(&ts).await.unwrap(), 40);
        let id = Query::column(&table, "document_id", "submission_timestamp", date());
        assert_eq!(wh.dry_run(&id).await.unwrap(), 45);
    }

    #[tokio::test]
    async fn test_sampled_documents_query() {
        let (wh, table) = warehouse();
        let query = Query::documents(&table, "document_id", "submission_timestamp", date())
            .with_sample("sample_id", 2);
        let rows = wh.query(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][DOCUMENT_ID_FIELD], json!("de"));
        let payload: Value =
            serde_json::from_str(rows[0][PAYLOAD_FIELD].as_str().unwrap()).unwrap();
        assert_eq!(payload["sample_id"], json!(2));
    }

    #[tokio::test]
    async fn test_fixture() {
        let wh = MemoryWarehouse::from_fixture_json(
            r#"{"tables": [{
                "project": "p", "dataset": "d_stable", "table": "t",
                "schema": [{"name": "created", "type": "TIMESTAMP"}],
                "rows": [{"created": "2020-01-01 00:00:00"}, {"created": "2020-01-03 00:00:00"}],
                "partition_column": "created",
                "extra_bytes": 3
            }]}"#,
        )
        .unwrap();
        let meta = wh
            .get_table(&TableRef::new("p", "d_stable", "t"), Some(date()))
            .await
            .unwrap();
        assert_eq!(meta.num_rows, 1);
        assert_eq!(meta.num_bytes, 19 + 3);
        assert_eq!(wh.list_datasets("p").await.unwrap(), vec!["d_stable"]);
    }

    #[tokio::test]
    async fn test_queries_filter_on_their_own_partition_column() {
        let table = TableRef::new("p", "d_stable", "t");
        let wh = MemoryWarehouse::new();
        wh.insert(
            table.clone(),
            MemoryTable {
                schema: vec![
                    TableFieldSchema::leaf("created", "TIMESTAMP", "NULLABLE"),
                    TableFieldSchema::leaf("loaded", "TIMESTAMP", "NULLABLE"),
                    TableFieldSchema::leaf("document_id", "STRING", "NULLABLE"),
                ],
                rows: vec![
                    row(json!({
                        "created": "2020-01-01T00:00:00Z",
                        "loaded": "2020-01-02T00:00:00Z",
                        "document_id": "a"
                    })),
                    row(json!({
                        "created": "2020-01-02T00:00:00Z",
                        "loaded": "2020-01-01T00:00:00Z",
                        "document_id": "b"
                    })),
                ],
                partition_column: "created".to_string(),
                extra_bytes: 0,
            },
        );

        let by_loaded = Query::documents(&table, "document_id", "loaded", date());
        let rows = wh.query(&by_loaded).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][DOCUMENT_ID_FIELD], json!("b"));

        let by_created = Query::documents(&table, "document_id", "created", date());
        let rows = wh.query(&by_created).await.unwrap();
        assert_eq!(rows[0][DOCUMENT_ID_FIELD], json!("a"));

        // Only the row loaded on the date is scanned: "loaded" plus "document_id".
        let id = Query::column(&table, "document_id", "loaded", date());
        assert_eq!(wh.dry_run(&id).await.unwrap(), 20 + 1);
    }

    #[tokio::test]
    async fn test_failures() {
        let (wh, table) = warehouse();
        wh.fail_table(table.clone());
        assert!(wh.get_table(&table, None).await.is_err());
        wh.fail_project("prod");
        assert!(matches!(
            wh.list_datasets("prod").await,
            Err(CompareError::RemoteMetadata { .. })
        ));
        let missing = TableRef::new("prod", "x", "y");
        assert!(wh.get_table(&missing, None).await.is_err());
    }
}
