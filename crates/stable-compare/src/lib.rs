//! # stable-compare
//!
//! Parity checks between a production and a staging copy of partitioned,
//! streaming-ingested warehouse tables.
//!
//! For one partition date every matching table pair goes through:
//!
//! - **Coarse** row count and byte size comparison from table metadata
//! - **Schema** diff, insensitive to field order and descriptions
//! - **Byte attribution** of a size difference to individual columns
//! - **Content** diff of normalized JSON rows joined on the document id,
//!   split into sample buckets for very large tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use stable_compare::{Comparator, Config};
//!
//! #[tokio::main]
//! async fn main() -> stable_compare::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let comparator = Comparator::new(config)?;
//!     let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
//!     let report = comparator.run(date).await?;
//!     println!("{} tables with differences", report.tables_with_differences);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod enumerate;
pub mod error;
pub mod orchestrator;
pub mod verify;
pub mod warehouse;

// Re-exports for convenient access
pub use config::{ComparisonConfig, Config, WarehouseConfig};
pub use crate::core::{Query, TableFieldSchema, TableMetadata, TablePair, TableRef, Warehouse};
pub use enumerate::{enumerate_pairs, table_pairs, TableFilter};
pub use error::{CompareError, Result};
pub use orchestrator::Comparator;
pub use verify::{CheckStage, ComparisonReport, TableChecker, TableComparison};
pub use warehouse::{BigQueryClient, MemoryWarehouse};
