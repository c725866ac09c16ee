//! Structured queries issued by the comparison stages.
//!
//! Every query the comparator runs is one of two shapes, scoped to a single
//! partition date and optionally a single sample bucket. Keeping them as data
//! lets the REST backend render parameterized SQL while the in-memory
//! backend evaluates them directly.

use chrono::NaiveDate;
use serde::Serialize;

use super::identifier::{quote, quote_table};
use super::table::TableRef;
use crate::error::Result;

/// Output column carrying the document id in [`Selection::Documents`] rows.
pub const DOCUMENT_ID_FIELD: &str = "document_id";

/// Output column carrying the row serialized as JSON.
pub const PAYLOAD_FIELD: &str = "payload";

/// Named parameter bound to the partition date.
pub const PARTITION_DATE_PARAM: &str = "partition_date";

/// Named parameter bound to the sample bucket.
pub const SAMPLE_PARAM: &str = "sample_id";

/// What a query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A single column, used for byte estimation.
    Column(String),
    /// Document id plus the whole row as a JSON string.
    Documents { id_column: String },
}

/// Restrict a query to one sample bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFilter {
    pub column: String,
    pub bucket: u32,
}

/// A partition-scoped query against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: TableRef,
    pub selection: Selection,
    pub partition_column: String,
    pub partition_date: NaiveDate,
    pub sample: Option<SampleFilter>,
}

/// Typed value of a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParameterValue {
    Date(NaiveDate),
    Int64(i64),
}

impl ParameterValue {
    /// Warehouse type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Date(_) => "DATE",
            ParameterValue::Int64(_) => "INT64",
        }
    }

    /// Value as sent over the wire.
    pub fn to_wire(&self) -> String {
        match self {
            ParameterValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            ParameterValue::Int64(v) => v.to_string(),
        }
    }
}

/// Named parameter bound into rendered SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: String,
    pub value: ParameterValue,
}

/// SQL text plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

impl Query {
    /// Query estimating the bytes of one column in a partition.
    pub fn column(
        table: &TableRef,
        column: &str,
        partition_column: &str,
        partition_date: NaiveDate,
    ) -> Self {
        Self {
            table: table.clone(),
            selection: Selection::Column(column.to_string()),
            partition_column: partition_column.to_string(),
            partition_date,
            sample: None,
        }
    }

    /// Query returning (document id, row JSON) for a partition.
    pub fn documents(
        table: &TableRef,
        id_column: &str,
        partition_column: &str,
        partition_date: NaiveDate,
    ) -> Self {
        Self {
            table: table.clone(),
            selection: Selection::Documents {
                id_column: id_column.to_string(),
            },
            partition_column: partition_column.to_string(),
            partition_date,
            sample: None,
        }
    }

    /// Restrict to one sample bucket.
    pub fn with_sample(mut self, column: &str, bucket: u32) -> Self {
        self.sample = Some(SampleFilter {
            column: column.to_string(),
            bucket,
        });
        self
    }

    /// Render to SQL with named parameters.
    pub fn render(&self) -> Result<RenderedQuery> {
        let table = quote_table(&self.table.project, &self.table.dataset, &self.table.table)?;
        let partition = quote(&self.partition_column)?;

        let select = match &self.selection {
            Selection::Column(column) => quote(column)?,
            Selection::Documents { id_column } => format!(
                "{} AS {}, TO_JSON_STRING(t) AS {}",
                quote(id_column)?,
                DOCUMENT_ID_FIELD,
                PAYLOAD_FIELD
            ),
        };

        let mut sql = format!(
            "SELECT {select}\nFROM {table} AS t\nWHERE DATE({partition}) = @{PARTITION_DATE_PARAM}"
        );
        let mut parameters = vec![QueryParameter {
            name: PARTITION_DATE_PARAM.to_string(),
            value: ParameterValue::Date(self.partition_date),
        }];

        if let Some(sample) = &self.sample {
            sql.push_str(&format!(
                "\n  AND {} = @{}",
                quote(&sample.column)?,
                SAMPLE_PARAM
            ));
            parameters.push(QueryParameter {
                name: SAMPLE_PARAM.to_string(),
                value: ParameterValue::Int64(i64::from(sample.bucket)),
            });
        }

        Ok(RenderedQuery { sql, parameters })
    }
}
