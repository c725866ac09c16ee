//! Per-table comparison pipeline.
//!
//! A table pair moves through these stages for one partition date:
//!
//! - **Coarse**: row count and byte size from table metadata
//! - **Schema**: order- and description-insensitive schema diff
//! - **Bytes**: when only bytes differ, attribute the delta to columns
//! - **Content**: normalized row-level outer join on the document id
//!
//! Only an unresolved content difference marks the table as a problem.
//! Schema and byte findings are logged but do not fail the table.

pub mod bytes;
pub mod coarse;
pub mod content;
pub mod normalize;
pub mod schema_diff;
pub mod types;
pub mod units;

pub use bytes::{attribute_bytes, attribution_order, ByteAttribution, ColumnAttribution};
pub use coarse::{compare_coarse, CoarseComparison};
pub use content::{ContentDiff, ContentDiffer};
pub use normalize::{NormalizeOptions, RowNormalizer};
pub use schema_diff::{deep_del_matching_keys, diff_schemas, SchemaDiff};
pub use types::{CheckStage, ComparisonReport, TableComparison};
pub use units::human_readable;

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::config::ComparisonConfig;
use crate::core::table::TablePair;
use crate::core::traits::Warehouse;
use crate::error::Result;

/// Runs every stage for one table pair.
pub struct TableChecker {
    warehouse: Arc<dyn Warehouse>,
    config: Arc<ComparisonConfig>,
    content: ContentDiffer,
}

impl TableChecker {
    /// Create a checker; the content differ shares its bucket pool across
    /// every table checked.
    pub fn new(warehouse: Arc<dyn Warehouse>, config: Arc<ComparisonConfig>) -> Self {
        let content = ContentDiffer::new(warehouse.clone(), config.clone());
        Self {
            warehouse,
            config,
            content,
        }
    }

    /// Check one pair. Errors are recorded in the result, never returned.
    pub async fn check(&self, pair: &TablePair, date: NaiveDate) -> TableComparison {
        let start = Instant::now();
        let mut comparison = TableComparison::new(pair);

        if let Err(e) = self.run_stages(pair, date, &mut comparison).await {
            error!(
                "{}: check failed after {} - {}",
                comparison.table, comparison.stage_reached, e
            );
            comparison.error = Some(e.to_string());
        }

        comparison.duration_ms = start.elapsed().as_millis() as u64;
        comparison
    }

    async fn run_stages(
        &self,
        pair: &TablePair,
        date: NaiveDate,
        comparison: &mut TableComparison,
    ) -> Result<()> {
        let table = pair.name();
        info!("{}: comparing {} for {}", table, pair, date);

        let coarse = compare_coarse(self.warehouse.as_ref(), pair, date).await?;
        comparison.prod_rows = coarse.prod.num_rows;
        comparison.stage_rows = coarse.stage.num_rows;
        comparison.prod_bytes = coarse.prod.num_bytes;
        comparison.stage_bytes = coarse.stage.num_bytes;
        comparison.row_difference = coarse.row_difference.clone();
        comparison.byte_difference = coarse.byte_difference.clone();
        comparison.different = coarse.different();
        comparison.stage_reached = CheckStage::CoarseChecked;

        if let Some(diff) = diff_schemas(&coarse.prod.schema, &coarse.stage.schema) {
            diff.log(&table);
            comparison.schema_diff = Some(diff);
        }
        comparison.stage_reached = CheckStage::SchemaChecked;

        if coarse.bytes_only() {
            let attribution = attribute_bytes(
                self.warehouse.as_ref(),
                pair,
                date,
                coarse.byte_delta(),
                &coarse.common_columns(),
                &self.config,
            )
            .await?;
            comparison.byte_attribution = Some(attribution);
            comparison.stage_reached = CheckStage::ByteAttributed;
        }

        let options = NormalizeOptions {
            replace_emoji: coarse.different() && self.config.has_emoji_artifact(&table),
            replace_replacement_char: coarse.different(),
        };
        let content = self.content.diff(pair, date, options).await?;
        comparison.stage_reached = CheckStage::ContentChecked;

        let mismatches = content.mismatch_count();
        let exclusions = options
            .describe()
            .map(|d| format!(" (excluding {})", d))
            .unwrap_or_default();
        if mismatches > 0 {
            error!(
                "{}: {} rows differ in content{} \
                 ({} missing in stage, {} missing in prod, {} changed)",
                table,
                mismatches,
                exclusions,
                content.missing_in_stage,
                content.missing_in_prod,
                content.content_mismatches
            );
            comparison.has_problem = true;
        } else if self.config.dry_run {
            info!("{}: dry run, content not compared", table);
        } else if coarse.different() {
            info!(
                "{}: no content differences{}; gross differences explained by other checks",
                table, exclusions
            );
        } else {
            info!("{}: no differences", table);
        }
        comparison.content_diff = Some(content);
        comparison.stage_reached = CheckStage::Reported;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableFieldSchema;
    use crate::core::table::TableRef;
    use crate::core::traits::Row;
    use crate::warehouse::MemoryWarehouse;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    fn schema() -> Vec<TableFieldSchema> {
        vec![
            TableFieldSchema::leaf("submission_timestamp", "TIMESTAMP", "NULLABLE"),
            TableFieldSchema::leaf("document_id", "STRING", "NULLABLE"),
            TableFieldSchema::leaf("text", "STRING", "NULLABLE"),
        ]
    }

    fn row(doc: &str, text: &str) -> Row {
        json!({
            "submission_timestamp": "2020-01-01T00:00:00Z",
            "document_id": doc,
            "text": text,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn checker(wh: Arc<MemoryWarehouse>, config: ComparisonConfig) -> TableChecker {
        TableChecker::new(wh, Arc::new(config))
    }

    fn pair() -> TablePair {
        TablePair::derive(TableRef::new("prod", "telemetry_stable", "event_v4"), "stage", "")
    }

    #[tokio::test]
    async fn test_replacement_char_explained_after_byte_difference() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = pair();
        wh.add_table(pair.prod.clone(), schema(), vec![row("a", "caf?")]);
        wh.add_table(pair.stage.clone(), schema(), vec![row("a", "caf\u{FFFD}")]);

        let result = checker(wh, ComparisonConfig::default()).check(&pair, date()).await;
        assert!(result.different);
        assert!(result.byte_difference.is_some());
        let attribution = result.byte_attribution.as_ref().unwrap();
        assert!(attribution.is_complete());
        assert_eq!(attribution.columns[0].column, "text");
        assert!(!result.has_problem);
        assert_eq!(result.stage_reached, CheckStage::Reported);
    }

    fn emoji_pair(wh: &MemoryWarehouse, prod_text: &str, stage_text: &str) -> TablePair {
        let pair = pair();
        wh.add_table(pair.prod.clone(), schema(), vec![row("a", prod_text)]);
        wh.add_table(pair.stage.clone(), schema(), vec![row("a", stage_text)]);
        pair
    }

    fn emoji_config() -> ComparisonConfig {
        ComparisonConfig {
            emoji_tables: vec!["telemetry_stable.event_v4".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_emoji_explained_for_listed_table() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = emoji_pair(&wh, "hi \u{1F600}", "hi ??");

        let result = checker(wh, emoji_config()).check(&pair, date()).await;
        assert!(result.different);
        assert!(!result.has_problem);
        let options = result.content_diff.unwrap().options;
        assert!(options.replace_emoji);
        assert!(options.replace_replacement_char);
    }

    #[tokio::test]
    async fn test_emoji_not_explained_for_unlisted_table() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = emoji_pair(&wh, "hi \u{1F600}", "hi ??");

        let result = checker(wh, ComparisonConfig::default()).check(&pair, date()).await;
        assert!(result.different);
        assert!(result.has_problem);
        let content = result.content_diff.unwrap();
        assert!(!content.options.replace_emoji);
        assert_eq!(content.content_mismatches, 1);
    }

    #[tokio::test]
    async fn test_emoji_replacement_needs_gross_difference() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = emoji_pair(&wh, "hi \u{1F600}", "hi \u{1F600}");

        let result = checker(wh, emoji_config()).check(&pair, date()).await;
        assert!(!result.different);
        assert!(!result.has_problem);
        let options = result.content_diff.unwrap().options;
        assert!(!options.replace_emoji);
        assert!(!options.replace_replacement_char);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = pair();
        wh.add_table(pair.prod.clone(), schema(), vec![]);

        let result = checker(wh, ComparisonConfig::default()).check(&pair, date()).await;
        assert!(result.is_failed());
        assert_eq!(result.stage_reached, CheckStage::Enumerated);
        assert!(result.error.unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_row_difference_skips_attribution() {
        let wh = Arc::new(MemoryWarehouse::new());
        let pair = pair();
        wh.add_table(pair.prod.clone(), schema(), vec![row("a", "x"), row("b", "y")]);
        wh.add_table(pair.stage.clone(), schema(), vec![row("a", "x")]);

        let result = checker(wh, ComparisonConfig::default()).check(&pair, date()).await;
        assert_eq!(result.row_difference.as_deref(), Some("stage expected 1 more rows"));
        assert!(result.byte_attribution.is_none());
        assert!(result.has_problem);
        assert_eq!(result.content_diff.unwrap().missing_in_stage, 1);
    }
}
