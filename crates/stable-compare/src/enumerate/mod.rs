//! Table enumeration.
//!
//! Lists `*_stable` datasets in the prod project, the tables inside them,
//! and pairs every table that passes the [`TableFilter`] with its stage
//! mirror. A listing failure ends the stream with an error.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ComparisonConfig;
use crate::core::table::{TablePair, TableRef};
use crate::core::traits::Warehouse;
use crate::error::{CompareError, Result};

/// Decides which prod tables are compared.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    /// Matched against `project.dataset.table`.
    pattern: Option<Regex>,
    /// `dataset.table` names; empty allows everything.
    allow: HashSet<String>,
}

impl TableFilter {
    /// Filter from a pattern and an allow-list.
    pub fn new(pattern: Option<&str>, allow: &[String]) -> Result<Self> {
        Ok(Self {
            pattern: pattern.map(Regex::new).transpose()?,
            allow: allow.iter().cloned().collect(),
        })
    }

    /// Filter described by the comparison settings.
    pub fn from_config(config: &ComparisonConfig) -> Result<Self> {
        Self::new(config.filter.as_deref(), &config.tables)
    }

    /// Whether `table` should be compared.
    pub fn matches(&self, table: &TableRef) -> bool {
        if !self.allow.is_empty() && !self.allow.contains(&table.short_name()) {
            return false;
        }
        self.pattern
            .as_ref()
            .map_or(true, |p| p.is_match(&table.to_string()))
    }
}

/// Lazily list the pairs to compare.
pub fn table_pairs(
    warehouse: Arc<dyn Warehouse>,
    config: Arc<ComparisonConfig>,
    filter: TableFilter,
) -> BoxStream<'static, Result<TablePair>> {
    let datasets = {
        let warehouse = warehouse.clone();
        let project = config.prod_project.clone();
        stream::once(async move { warehouse.list_datasets(&project).await })
    };

    let suffix = config.dataset_suffix.clone();
    let listing = config.clone();
    let pairing = config;

    datasets
        .map_ok(|names| stream::iter(names.into_iter().map(Ok::<String, CompareError>)))
        .try_flatten()
        .try_filter(move |dataset| future::ready(dataset.ends_with(&suffix)))
        .and_then(move |dataset| {
            let warehouse = warehouse.clone();
            let project = listing.prod_project.clone();
            async move {
                let tables = warehouse.list_tables(&project, &dataset).await?;
                Ok::<_, CompareError>(stream::iter(tables.into_iter().map(move |table| {
                    Ok::<_, CompareError>(TableRef::new(project.clone(), dataset.clone(), table))
                })))
            }
        })
        .try_flatten()
        .try_filter(move |table| future::ready(filter.matches(table)))
        .map_ok(move |table| {
            TablePair::derive(
                table,
                &pairing.stage_project,
                &pairing.stage_dataset_suffix,
            )
        })
        .boxed()
}

/// Collect every pair, failing on the first listing error.
pub async fn enumerate_pairs(
    warehouse: Arc<dyn Warehouse>,
    config: Arc<ComparisonConfig>,
) -> Result<Vec<TablePair>> {
    let filter = TableFilter::from_config(&config)?;
    table_pairs(warehouse, config, filter).try_collect().await
}
