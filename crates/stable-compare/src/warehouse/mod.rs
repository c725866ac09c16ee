//! Warehouse backends.
//!
//! - [`BigQueryClient`]: the REST API used in real runs
//! - [`MemoryWarehouse`]: JSON rows held in memory, for tests and fixtures

mod bigquery;
mod memory;

pub use bigquery::BigQueryClient;
pub use memory::{MemoryTable, MemoryWarehouse};
