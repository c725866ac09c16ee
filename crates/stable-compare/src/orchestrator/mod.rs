//! Comparison orchestrator - runs every table check for one partition.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::table::TablePair;
use crate::core::traits::Warehouse;
use crate::enumerate::enumerate_pairs;
use crate::error::{CompareError, Result};
use crate::verify::{ComparisonReport, TableChecker, TableComparison};
use crate::warehouse::BigQueryClient;

/// Comparison orchestrator.
pub struct Comparator {
    config: Config,
    warehouse: Arc<dyn Warehouse>,
}

impl Comparator {
    /// Create a comparator backed by the BigQuery REST API.
    pub fn new(config: Config) -> Result<Self> {
        let warehouse = BigQueryClient::from_config(&config)?;
        Ok(Self::with_warehouse(config, Arc::new(warehouse)))
    }

    /// Create a comparator over any warehouse backend.
    pub fn with_warehouse(config: Config, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { config, warehouse }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Table pairs the run would compare.
    pub async fn list_pairs(&self) -> Result<Vec<TablePair>> {
        let comparison = Arc::new(self.config.comparison.clone());
        enumerate_pairs(self.warehouse.clone(), comparison).await
    }

    /// Compare every enumerated table for `date`.
    ///
    /// Fails only when enumeration fails; per-table failures are recorded in
    /// the report.
    pub async fn run(&self, date: NaiveDate) -> Result<ComparisonReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let comparison = Arc::new(self.config.comparison.clone());

        info!(
            "Starting comparison run {} for {} ({} -> {}) on {}",
            run_id,
            date,
            comparison.prod_project,
            comparison.stage_project,
            self.warehouse.name()
        );
        if comparison.dry_run {
            info!("Dry run: content queries are estimated, not executed");
        }

        let pairs = enumerate_pairs(self.warehouse.clone(), comparison.clone()).await?;
        if pairs.is_empty() {
            warn!("No tables matched the configured filter");
        }
        info!(
            "Comparing {} tables with parallelism {}",
            pairs.len(),
            comparison.parallelism
        );

        let checker = Arc::new(TableChecker::new(self.warehouse.clone(), comparison.clone()));
        let semaphore = Arc::new(Semaphore::new(comparison.parallelism.max(1)));

        let mut handles = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CompareError::table_check(pair.name(), e))?;
            let checker = checker.clone();
            let task_pair = pair.clone();

            let handle = tokio::spawn(async move {
                let result = checker.check(&task_pair, date).await;
                drop(permit);
                result
            });
            handles.push((pair, handle));
        }

        let mut tables: Vec<TableComparison> = Vec::with_capacity(handles.len());
        for (pair, handle) in handles {
            match handle.await {
                Ok(result) => tables.push(result),
                Err(e) => {
                    error!("{}: task panicked - {}", pair.name(), e);
                    tables.push(TableComparison::failed(
                        &pair,
                        CompareError::table_check(pair.name(), format!("task panicked: {}", e)),
                    ));
                }
            }
        }

        let report = ComparisonReport::new(run_id, date, started_at, comparison.dry_run, tables);
        info!(
            "Comparison complete: {} tables, {} in sync, {} with differences, {} failed ({:.1}s)",
            report.tables_total,
            report.tables_in_sync,
            report.tables_with_differences,
            report.tables_failed,
            report.duration_seconds
        );
        for name in report.problem_tables() {
            warn!("Unresolved: {}", name);
        }
        Ok(report)
    }
}
