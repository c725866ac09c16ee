//! Attribution of a byte size difference to individual columns.
//!
//! Each column is estimated with a dry-run query on both sides. Every such
//! query also scans the partition column, so its estimate is subtracted from
//! every later column.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::ComparisonConfig;
use crate::core::query::Query;
use crate::core::table::TablePair;
use crate::core::traits::Warehouse;
use crate::error::Result;

use super::units::{direction, human_bytes, signed_delta};

/// Bytes of one column on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAttribution {
    pub column: String,
    pub prod_bytes: u64,
    pub stage_bytes: u64,
    /// `prod_bytes - stage_bytes`.
    pub delta: i64,
}

/// Outcome of attributing a byte delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteAttribution {
    /// Prod bytes minus stage bytes from table metadata.
    pub total_delta: i64,
    /// Columns with a non-zero delta, in the order they were checked.
    pub columns: Vec<ColumnAttribution>,
    /// Part of `total_delta` no column accounts for.
    pub unattributed: i64,
}

impl ByteAttribution {
    /// Sum of per-column deltas.
    pub fn attributed(&self) -> i64 {
        self.columns.iter().map(|c| c.delta).sum()
    }

    /// True when the columns explain the whole delta.
    pub fn is_complete(&self) -> bool {
        self.unattributed == 0
    }
}

/// Order in which columns are checked: partition column, environment
/// column, additional properties column, then the rest alphabetically.
///
/// Only the partition column is included regardless of `columns`, since every
/// estimate depends on it.
pub fn attribution_order(columns: &[String], config: &ComparisonConfig) -> Vec<String> {
    let priority = [
        config.partition_column.as_str(),
        config.environment_column.as_str(),
        config.additional_properties_column.as_str(),
    ];

    let mut order = vec![config.partition_column.clone()];
    for column in &priority[1..] {
        if columns.iter().any(|c| c == column) && !order.iter().any(|c| c == column) {
            order.push(column.to_string());
        }
    }

    let mut rest: Vec<String> = columns
        .iter()
        .filter(|c| !priority.contains(&c.as_str()))
        .cloned()
        .collect();
    rest.sort();
    rest.dedup();
    order.extend(rest);
    order
}

/// Attribute `total_delta` (prod minus stage bytes) to the given columns.
///
/// Stops as soon as the attributed sum equals `total_delta`. Any remainder is
/// logged as an error and returned, it is not fatal.
pub async fn attribute_bytes(
    warehouse: &dyn Warehouse,
    pair: &TablePair,
    date: NaiveDate,
    total_delta: i64,
    columns: &[String],
    config: &ComparisonConfig,
) -> Result<ByteAttribution> {
    let table = pair.name();
    let mut attribution = ByteAttribution {
        total_delta,
        columns: Vec::new(),
        unattributed: total_delta,
    };
    let mut partition_bytes = (0u64, 0u64);

    for column in attribution_order(columns, config) {
        let prod_query = Query::column(&pair.prod, &column, &config.partition_column, date);
        let stage_query = Query::column(&pair.stage, &column, &config.partition_column, date);
        let (mut prod_bytes, mut stage_bytes) = tokio::try_join!(
            warehouse.dry_run(&prod_query),
            warehouse.dry_run(&stage_query),
        )?;

        if column == config.partition_column {
            partition_bytes = (prod_bytes, stage_bytes);
        } else {
            prod_bytes = prod_bytes.saturating_sub(partition_bytes.0);
            stage_bytes = stage_bytes.saturating_sub(partition_bytes.1);
        }

        let delta = signed_delta(prod_bytes, stage_bytes);
        if delta == 0 {
            continue;
        }

        warn!(
            "{}: stage expected {} {} in {}",
            table,
            human_bytes(delta.unsigned_abs()),
            direction(delta),
            column
        );
        attribution.columns.push(ColumnAttribution {
            column,
            prod_bytes,
            stage_bytes,
            delta,
        });
        attribution.unattributed = attribution.unattributed.saturating_sub(delta);
        if attribution.unattributed == 0 {
            break;
        }
    }

    if attribution.is_complete() {
        info!(
            "{}: byte difference fully attributed to {} column(s)",
            table,
            attribution.columns.len()
        );
    } else {
        let remaining = attribution.unattributed;
        error!(
            "{}: stage expected {} {} from fields not found in prod and stage",
            table,
            human_bytes(remaining.unsigned_abs()),
            direction(remaining)
        );
    }
    Ok(attribution)
}
