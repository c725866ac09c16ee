//! Core types shared by the comparison stages.
//!
//! - [`table`]: table identifiers, prod/stage pairs and partition metadata
//! - [`schema`]: column schema in list, tree and comparable form
//! - [`query`]: structured, partition-scoped queries
//! - [`identifier`]: identifier validation and quoting
//! - [`traits`]: the [`Warehouse`] trait implemented by the backends

pub mod identifier;
pub mod query;
pub mod schema;
pub mod table;
pub mod traits;

pub use query::{Query, RenderedQuery, Selection};
pub use schema::{ComparableField, ComparableSchema, Field, TableFieldSchema};
pub use table::{TableMetadata, TablePair, TableRef};
pub use traits::{Row, Warehouse};
