//! Row count and byte size comparison of one partition.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::core::table::{TableMetadata, TablePair};
use crate::core::traits::Warehouse;
use crate::error::Result;

use super::units::{direction, human_bytes, human_rows, signed_delta};

/// Metadata of both sides and the gross differences between them.
#[derive(Debug, Clone)]
pub struct CoarseComparison {
    pub prod: TableMetadata,
    pub stage: TableMetadata,
    /// Set when row counts differ.
    pub row_difference: Option<String>,
    /// Set when row counts match but byte sizes differ.
    pub byte_difference: Option<String>,
}

impl CoarseComparison {
    /// Compare already fetched metadata.
    pub fn from_metadata(table: &str, prod: TableMetadata, stage: TableMetadata) -> Self {
        let mut row_difference = None;
        let mut byte_difference = None;

        if prod.num_rows != stage.num_rows {
            let delta = signed_delta(prod.num_rows, stage.num_rows);
            let message = format!(
                "stage expected {} {} rows",
                human_rows(delta.unsigned_abs()),
                direction(delta)
            );
            warn!("{}: {}", table, message);
            row_difference = Some(message);
        } else if prod.num_bytes != stage.num_bytes {
            let delta = signed_delta(prod.num_bytes, stage.num_bytes);
            let message = format!(
                "stage expected {} {}",
                human_bytes(delta.unsigned_abs()),
                direction(delta)
            );
            warn!("{}: {}", table, message);
            byte_difference = Some(message);
        } else {
            debug!(
                "{}: {} rows and {} match",
                table,
                human_rows(prod.num_rows),
                human_bytes(prod.num_bytes)
            );
        }

        Self {
            prod,
            stage,
            row_difference,
            byte_difference,
        }
    }

    /// True when either rows or bytes differ.
    pub fn different(&self) -> bool {
        self.row_difference.is_some() || self.byte_difference.is_some()
    }

    /// True when rows match but bytes differ, the case byte attribution
    /// applies to.
    pub fn bytes_only(&self) -> bool {
        self.row_difference.is_none() && self.byte_difference.is_some()
    }

    /// Prod bytes minus stage bytes.
    pub fn byte_delta(&self) -> i64 {
        signed_delta(self.prod.num_bytes, self.stage.num_bytes)
    }

    /// Top-level columns present on both sides, in prod order.
    pub fn common_columns(&self) -> Vec<String> {
        let stage = self.stage.column_names();
        self.prod
            .column_names()
            .into_iter()
            .filter(|c| stage.contains(c))
            .collect()
    }
}

/// Fetch partition metadata for both sides and compare it.
pub async fn compare_coarse(
    warehouse: &dyn Warehouse,
    pair: &TablePair,
    date: NaiveDate,
) -> Result<CoarseComparison> {
    let (prod, stage) = tokio::try_join!(
        warehouse.get_table(&pair.prod, Some(date)),
        warehouse.get_table(&pair.stage, Some(date)),
    )?;
    Ok(CoarseComparison::from_metadata(&pair.name(), prod, stage))
}
