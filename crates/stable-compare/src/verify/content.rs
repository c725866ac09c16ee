//! Row-level content comparison.
//!
//! Both sides of a partition are fetched as `(document_id, payload)` pairs,
//! normalized with [`RowNormalizer`] and full-outer-joined on the document id.
//! Large tables are split into sample buckets that run on a shared worker
//! pool; their counts are summed once every bucket has finished.

use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::ComparisonConfig;
use crate::core::query::{Query, DOCUMENT_ID_FIELD, PAYLOAD_FIELD};
use crate::core::table::{TablePair, TableRef};
use crate::core::traits::{Row, Warehouse};
use crate::error::{CompareError, Result};

use super::normalize::{NormalizeOptions, NormalizedRow, RowNormalizer, MISSING_ROW};
use super::units::human_bytes;

/// Join counts for a partition or bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDiff {
    /// Prod rows with no stage row of the same id.
    pub missing_in_stage: u64,
    /// Stage rows with no prod row of the same id.
    pub missing_in_prod: u64,
    /// Joined row pairs whose content or additional properties differ.
    pub content_mismatches: u64,
    /// A few document ids of differing rows, for follow-up.
    pub example_ids: Vec<String>,
    /// Sample buckets compared; 1 when the table is not split.
    pub buckets: u32,
    /// Artifact normalization applied.
    pub options: NormalizeOptions,
    /// Bytes the comparison would scan, set in dry-run mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
}

impl ContentDiff {
    /// Joined rows that do not compare equal.
    pub fn mismatch_count(&self) -> u64 {
        self.missing_in_stage + self.missing_in_prod + self.content_mismatches
    }

    fn merge(&mut self, other: ContentDiff, max_examples: usize) {
        self.missing_in_stage += other.missing_in_stage;
        self.missing_in_prod += other.missing_in_prod;
        self.content_mismatches += other.content_mismatches;
        let room = max_examples.saturating_sub(self.example_ids.len());
        self.example_ids
            .extend(other.example_ids.into_iter().take(room));
    }
}

/// Compares row content of table pairs.
pub struct ContentDiffer {
    warehouse: Arc<dyn Warehouse>,
    config: Arc<ComparisonConfig>,
    bucket_pool: Arc<Semaphore>,
}

impl ContentDiffer {
    /// Create a differ whose bucket pool has `config.parallelism` permits.
    ///
    /// The pool is separate from the one running table checks, so a table
    /// holding a table permit can always make progress on its buckets.
    pub fn new(warehouse: Arc<dyn Warehouse>, config: Arc<ComparisonConfig>) -> Self {
        let bucket_pool = Arc::new(Semaphore::new(config.parallelism.max(1)));
        Self {
            warehouse,
            config,
            bucket_pool,
        }
    }

    /// Compare one partition of `pair`.
    pub async fn diff(
        &self,
        pair: &TablePair,
        date: NaiveDate,
        options: NormalizeOptions,
    ) -> Result<ContentDiff> {
        let table = pair.name();
        if self.config.dry_run {
            return self.estimate(pair, date, options).await;
        }

        let diff = if self.config.is_large_table(&table) {
            self.diff_buckets(pair, date, options).await?
        } else {
            let mut diff =
                diff_partition(self.warehouse.as_ref(), &self.config, pair, date, None, options)
                    .await?;
            diff.buckets = 1;
            diff
        };

        Ok(diff)
    }

    async fn estimate(
        &self,
        pair: &TablePair,
        date: NaiveDate,
        options: NormalizeOptions,
    ) -> Result<ContentDiff> {
        let prod = self.documents_query(&pair.prod, date);
        let stage = self.documents_query(&pair.stage, date);
        let (prod_bytes, stage_bytes) = tokio::try_join!(
            self.warehouse.dry_run(&prod),
            self.warehouse.dry_run(&stage),
        )?;
        let total = prod_bytes.saturating_add(stage_bytes);
        info!(
            "{}: content comparison would process {}",
            pair.name(),
            human_bytes(total)
        );
        Ok(ContentDiff {
            buckets: 0,
            options,
            estimated_bytes: Some(total),
            ..Default::default()
        })
    }

    fn documents_query(&self, table: &TableRef, date: NaiveDate) -> Query {
        Query::documents(
            table,
            &self.config.document_id_column,
            &self.config.partition_column,
            date,
        )
    }

    async fn diff_buckets(
        &self,
        pair: &TablePair,
        date: NaiveDate,
        options: NormalizeOptions,
    ) -> Result<ContentDiff> {
        let table = pair.name();
        let buckets = self.config.sample_buckets;
        info!("{}: comparing content in {} sample buckets", table, buckets);

        let mut handles = Vec::with_capacity(buckets as usize);
        for bucket in 0..buckets {
            let pool = self.bucket_pool.clone();
            let warehouse = self.warehouse.clone();
            let config = self.config.clone();
            let pair = pair.clone();

            handles.push(tokio::spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|e| CompareError::table_check(pair.name(), e))?;
                diff_partition(warehouse.as_ref(), &config, &pair, date, Some(bucket), options)
                    .await
            }));
        }

        // Every bucket finishes before the counts are summed.
        let results = join_all(handles).await;

        let mut total = ContentDiff {
            buckets,
            options,
            ..Default::default()
        };
        let mut first_error = None;
        for (bucket, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(diff)) => total.merge(diff, self.config.max_logged_mismatches),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(CompareError::table_check(
                        &table,
                        format!("sample bucket {} panicked: {}", bucket, e),
                    ));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

/// Compare one partition, or one sample bucket of it.
pub async fn diff_partition(
    warehouse: &dyn Warehouse,
    config: &ComparisonConfig,
    pair: &TablePair,
    date: NaiveDate,
    bucket: Option<u32>,
    options: NormalizeOptions,
) -> Result<ContentDiff> {
    let scoped = |table: &TableRef| {
        let query = Query::documents(
            table,
            &config.document_id_column,
            &config.partition_column,
            date,
        );
        match bucket {
            Some(b) => query.with_sample(&config.sample_column, b),
            None => query,
        }
    };
    let prod_query = scoped(&pair.prod);
    let stage_query = scoped(&pair.stage);

    let (prod_rows, stage_rows) =
        tokio::try_join!(warehouse.query(&prod_query), warehouse.query(&stage_query))?;

    let normalizer = RowNormalizer::new(config, options);
    let prod = index_rows(&normalizer, &pair.prod, prod_rows)?;
    let stage = index_rows(&normalizer, &pair.stage, stage_rows)?;

    let mut diff = outer_join(&pair.name(), &prod, &stage, config.max_logged_mismatches);
    diff.options = options;
    if let Some(b) = bucket {
        debug!(
            "{}: sample bucket {} has {} differing rows",
            pair.name(),
            b,
            diff.mismatch_count()
        );
    }
    Ok(diff)
}

/// Rows of one side grouped by document id; rows without an id never join.
#[derive(Debug, Default)]
struct IndexedRows {
    by_id: BTreeMap<String, Vec<NormalizedRow>>,
    without_id: u64,
}

fn index_rows(normalizer: &RowNormalizer, table: &TableRef, rows: Vec<Row>) -> Result<IndexedRows> {
    let mut indexed = IndexedRows::default();
    for row in rows {
        let payload = row
            .get(PAYLOAD_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CompareError::query(
                    format!("documents of {}", table),
                    format!("row without a {} string", PAYLOAD_FIELD),
                )
            })?;
        let normalized = normalizer.normalize_json(payload)?;

        match row.get(DOCUMENT_ID_FIELD) {
            None | Some(Value::Null) => indexed.without_id += 1,
            Some(Value::String(id)) => {
                indexed.by_id.entry(id.clone()).or_default().push(normalized)
            }
            Some(other) => indexed
                .by_id
                .entry(other.to_string())
                .or_default()
                .push(normalized),
        }
    }
    Ok(indexed)
}

fn outer_join(
    table: &str,
    prod: &IndexedRows,
    stage: &IndexedRows,
    max_examples: usize,
) -> ContentDiff {
    let mut diff = ContentDiff {
        missing_in_stage: prod.without_id,
        missing_in_prod: stage.without_id,
        ..Default::default()
    };
    let note = |diff: &mut ContentDiff,
                id: &str,
                prod: Option<&NormalizedRow>,
                stage: Option<&NormalizedRow>| {
        if diff.example_ids.len() < max_examples {
            diff.example_ids.push(id.to_string());
            debug!("{}: {}", table, example_detail(id, prod, stage));
        }
    };

    for (id, prod_rows) in &prod.by_id {
        match stage.by_id.get(id) {
            None => {
                diff.missing_in_stage += prod_rows.len() as u64;
                note(&mut diff, id, prod_rows.first(), None);
            }
            Some(stage_rows) => {
                let mut differing = prod_rows
                    .iter()
                    .flat_map(|p| stage_rows.iter().map(move |s| (p, s)))
                    .filter(|(p, s)| p != s);
                if let Some((p, s)) = differing.next() {
                    diff.content_mismatches += 1 + differing.count() as u64;
                    note(&mut diff, id, Some(p), Some(s));
                }
            }
        }
    }
    for (id, stage_rows) in &stage.by_id {
        if !prod.by_id.contains_key(id) {
            diff.missing_in_prod += stage_rows.len() as u64;
            note(&mut diff, id, None, stage_rows.first());
        }
    }
    diff
}

/// Characters of canonical content shown per side in example logs.
const EXAMPLE_CHARS: usize = 200;

fn truncated(s: &str) -> String {
    match s.char_indices().nth(EXAMPLE_CHARS) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

fn describe_side(row: Option<&NormalizedRow>) -> String {
    match row {
        None => "<missing>".to_string(),
        Some(r) if r.additional_properties == MISSING_ROW => truncated(&r.content),
        Some(r) => format!(
            "{} additional_properties={}",
            truncated(&r.content),
            truncated(&r.additional_properties)
        ),
    }
}

/// One differing document, with both sides' canonical content.
fn example_detail(
    id: &str,
    prod: Option<&NormalizedRow>,
    stage: Option<&NormalizedRow>,
) -> String {
    format!(
        "document_id {} differs\n  prod:  {}\n  stage: {}",
        id,
        describe_side(prod),
        describe_side(stage)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableFieldSchema;
    use crate::warehouse::MemoryWarehouse;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    fn schema() -> Vec<TableFieldSchema> {
        vec![
            TableFieldSchema::leaf("submission_timestamp", "TIMESTAMP", "NULLABLE"),
            TableFieldSchema::leaf("document_id", "STRING", "NULLABLE"),
            TableFieldSchema::leaf("sample_id", "INT64", "NULLABLE"),
            TableFieldSchema::leaf("payload", "STRING", "NULLABLE"),
        ]
    }

    fn row(doc: Option<&str>, sample: u32, payload: Value) -> Row {
        json!({
            "submission_timestamp": "2020-01-01T00:00:00Z",
            "document_id": doc,
            "sample_id": sample,
            "payload": payload,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn setup(
        table: &str,
        prod: Vec<Row>,
        stage: Vec<Row>,
    ) -> (Arc<MemoryWarehouse>, TablePair) {
        let pair = TablePair::derive(TableRef::new("prod", "telemetry_stable", table), "stage", "");
        let wh = Arc::new(MemoryWarehouse::new());
        wh.add_table(pair.prod.clone(), schema(), prod);
        wh.add_table(pair.stage.clone(), schema(), stage);
        (wh, pair)
    }

    fn differ(wh: Arc<MemoryWarehouse>, config: ComparisonConfig) -> ContentDiffer {
        ContentDiffer::new(wh, Arc::new(config))
    }

    #[tokio::test]
    async fn test_identical_content_ignores_key_order_and_nulls() {
        let (wh, pair) = setup(
            "event_v4",
            vec![row(Some("a"), 1, json!({"x": 1, "y": {"z": 2}}))],
            vec![row(Some("a"), 1, json!({"y": {"z": 2, "w": null}, "x": 1}))],
        );
        let diff = differ(wh, ComparisonConfig::default())
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.mismatch_count(), 0);
        assert_eq!(diff.buckets, 1);
    }

    #[tokio::test]
    async fn test_missing_and_changed_rows() {
        let (wh, pair) = setup(
            "event_v4",
            vec![
                row(Some("a"), 1, json!({"x": 1})),
                row(Some("b"), 1, json!({"x": 2})),
                row(Some("c"), 1, json!({"x": 3})),
                row(None, 1, json!({"x": 4})),
            ],
            vec![
                row(Some("a"), 1, json!({"x": 1})),
                row(Some("c"), 1, json!({"x": 30})),
                row(Some("d"), 1, json!({"x": 5})),
            ],
        );
        let diff = differ(wh, ComparisonConfig::default())
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.missing_in_stage, 2);
        assert_eq!(diff.missing_in_prod, 1);
        assert_eq!(diff.content_mismatches, 1);
        assert_eq!(diff.mismatch_count(), 4);
        assert_eq!(diff.example_ids, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_compare_every_pair() {
        let (wh, pair) = setup(
            "event_v4",
            vec![
                row(Some("a"), 1, json!({"x": 1})),
                row(Some("a"), 1, json!({"x": 2})),
            ],
            vec![row(Some("a"), 1, json!({"x": 1}))],
        );
        let diff = differ(wh, ComparisonConfig::default())
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.content_mismatches, 1);
    }

    #[tokio::test]
    async fn test_additional_properties_compared_separately() {
        let mut prod = row(Some("a"), 1, json!({"x": 1}));
        prod.insert("additional_properties".to_string(), json!("{\"k\":null}"));
        let mut stage = row(Some("a"), 1, json!({"x": 1}));
        stage.insert("additional_properties".to_string(), json!("{}"));
        let (wh, pair) = setup("event_v4", vec![prod], vec![stage]);
        let diff = differ(wh, ComparisonConfig::default())
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.content_mismatches, 1);
    }

    #[tokio::test]
    async fn test_replacement_char_normalized_when_enabled() {
        let (wh, pair) = setup(
            "event_v4",
            vec![row(Some("a"), 1, json!({"t": "caf?"}))],
            vec![row(Some("a"), 1, json!({"t": "caf\u{FFFD}"}))],
        );
        let differ = differ(wh, ComparisonConfig::default());
        let strict = differ
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(strict.content_mismatches, 1);

        let options = NormalizeOptions {
            replace_emoji: false,
            replace_replacement_char: true,
        };
        let relaxed = differ.diff(&pair, date(), options).await.unwrap();
        assert_eq!(relaxed.content_mismatches, 0);
        assert_eq!(relaxed.options, options);
    }

    #[tokio::test]
    async fn test_large_table_sums_buckets() {
        let prod: Vec<Row> = (0..10)
            .map(|i| row(Some(&format!("id{}", i)), i % 4, json!({"i": i})))
            .collect();
        let mut stage = prod.clone();
        stage.remove(3);
        stage[0] = row(Some("id0"), 0, json!({"i": 100}));
        let (wh, pair) = setup("main_v4", prod, stage);

        let config = ComparisonConfig {
            sample_buckets: 4,
            parallelism: 2,
            ..Default::default()
        };
        let diff = differ(wh, config)
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.buckets, 4);
        assert_eq!(diff.missing_in_stage, 1);
        assert_eq!(diff.content_mismatches, 1);
    }

    #[tokio::test]
    async fn test_bucket_failure_fails_the_table() {
        let (wh, pair) = setup("main_v4", vec![], vec![]);
        wh.fail_table(pair.stage.clone());
        let config = ComparisonConfig {
            sample_buckets: 3,
            ..Default::default()
        };
        let result = differ(wh, config)
            .diff(&pair, date(), NormalizeOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_example_detail_shows_both_sides() {
        let prod = NormalizedRow {
            content: r#"{"x":1}"#.to_string(),
            additional_properties: MISSING_ROW.to_string(),
        };
        let stage = NormalizedRow {
            content: r#"{"x":2}"#.to_string(),
            additional_properties: r#"{"k":1}"#.to_string(),
        };
        let detail = example_detail("a", Some(&prod), Some(&stage));
        assert!(detail.contains("document_id a differs"));
        assert!(detail.contains(r#"prod:  {"x":1}"#));
        assert!(detail.contains(r#"stage: {"x":2} additional_properties={"k":1}"#));

        let missing = example_detail("b", Some(&prod), None);
        assert!(missing.contains("stage: <missing>"));
    }

    #[test]
    fn test_example_content_is_truncated() {
        let long = "\u{e9}".repeat(EXAMPLE_CHARS + 10);
        let shown = truncated(&long);
        assert_eq!(shown.chars().count(), EXAMPLE_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(truncated("short"), "short");
    }

    #[tokio::test]
    async fn test_dry_run_only_estimates() {
        let (wh, pair) = setup(
            "main_v4",
            vec![row(Some("a"), 1, json!({"x": 1}))],
            vec![],
        );
        let config = ComparisonConfig {
            dry_run: true,
            ..Default::default()
        };
        let diff = differ(wh, config)
            .diff(&pair, date(), NormalizeOptions::default())
            .await
            .unwrap();
        assert_eq!(diff.mismatch_count(), 0);
        assert!(diff.estimated_bytes.unwrap() > 0);
    }
}
