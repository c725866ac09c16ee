//! Column schema representations.
//!
//! Three shapes of the same information are used:
//!
//! - [`TableFieldSchema`]: the list-of-fields form returned by the warehouse
//!   and used for reporting.
//! - [`Field`]: a tagged tree (leaf or record) with descriptions removed.
//! - [`ComparableSchema`]: fields keyed and sorted by name, each carrying the
//!   normalized attribute set used for equality.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute key holding the column type.
pub const TYPE_KEY: &str = "type";

/// Attribute key holding the column mode.
pub const MODE_KEY: &str = "mode";

/// One column as returned by the warehouse (`schema.fields[]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableFieldSchema {
    /// Column name.
    pub name: String,

    /// Column type, e.g. `STRING` or `RECORD`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    /// `NULLABLE`, `REQUIRED` or `REPEATED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Free-form description, ignored by comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Nested columns of a record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<TableFieldSchema>>,

    /// Any other attribute (policy tags, precision, collation, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TableFieldSchema {
    /// Leaf column.
    pub fn leaf(name: &str, field_type: &str, mode: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: Some(field_type.to_string()),
            mode: Some(mode.to_string()),
            ..Default::default()
        }
    }

    /// Record column with nested fields.
    pub fn record(name: &str, mode: &str, fields: Vec<TableFieldSchema>) -> Self {
        Self {
            name: name.to_string(),
            field_type: Some("RECORD".to_string()),
            mode: Some(mode.to_string()),
            fields: Some(fields),
            ..Default::default()
        }
    }
}

/// Non-description attributes of a column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldAttributes {
    pub field_type: Option<String>,
    pub mode: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

impl FieldAttributes {
    /// Flatten into the normalized comparison key.
    fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = self.extra.clone();
        if let Some(t) = &self.field_type {
            map.insert(TYPE_KEY.to_string(), Value::String(t.clone()));
        }
        if let Some(m) = &self.mode {
            map.insert(MODE_KEY.to_string(), Value::String(m.clone()));
        }
        map
    }

    fn from_map(mut map: BTreeMap<String, Value>) -> Self {
        let take_string = |map: &mut BTreeMap<String, Value>, key: &str| {
            map.remove(key).and_then(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
        };
        let field_type = take_string(&mut map, TYPE_KEY);
        let mode = take_string(&mut map, MODE_KEY);
        Self {
            field_type,
            mode,
            extra: map,
        }
    }
}

/// Column tree with descriptions stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Scalar column.
    Leaf {
        name: String,
        attributes: FieldAttributes,
    },
    /// Record column with nested fields.
    Record {
        name: String,
        attributes: FieldAttributes,
        fields: Vec<Field>,
    },
}

impl Field {
    /// Column name.
    pub fn name(&self) -> &str {
        match self {
            Field::Leaf { name, .. } | Field::Record { name, .. } => name,
        }
    }

    /// Build from the warehouse representation, dropping descriptions.
    pub fn from_wire(field: &TableFieldSchema) -> Self {
        let attributes = FieldAttributes {
            field_type: field.field_type.clone(),
            mode: field.mode.clone(),
            extra: field.extra.clone(),
        };
        let is_record = matches!(
            field.field_type.as_deref(),
            Some("RECORD") | Some("STRUCT")
        ) || field.fields.as_ref().is_some_and(|f| !f.is_empty());

        if is_record {
            Field::Record {
                name: field.name.clone(),
                attributes,
                fields: field
                    .fields
                    .iter()
                    .flatten()
                    .map(Field::from_wire)
                    .collect(),
            }
        } else {
            Field::Leaf {
                name: field.name.clone(),
                attributes,
            }
        }
    }
}

/// Convert a warehouse schema into the tagged tree.
pub fn fields_from_wire(schema: &[TableFieldSchema]) -> Vec<Field> {
    schema.iter().map(Field::from_wire).collect()
}

/// Normalized, order-independent view of one column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparableField {
    /// Non-description attributes keyed by attribute name.
    pub attributes: BTreeMap<String, Value>,
    /// Nested columns, present for records.
    pub fields: Option<ComparableSchema>,
}

impl ComparableField {
    /// True when nothing is left after a reduction.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.fields.as_ref().map_or(true, |f| f.is_empty())
    }
}

/// Columns keyed (and therefore sorted) by name.
pub type ComparableSchema = BTreeMap<String, ComparableField>;

/// Build the comparable representation of a column tree.
pub fn comparable_schema(fields: &[Field]) -> ComparableSchema {
    fields
        .iter()
        .map(|field| {
            let comparable = match field {
                Field::Leaf { attributes, .. } => ComparableField {
                    attributes: attributes.to_map(),
                    fields: None,
                },
                Field::Record {
                    attributes, fields, ..
                } => ComparableField {
                    attributes: attributes.to_map(),
                    fields: Some(comparable_schema(fields)),
                },
            };
            (field.name().to_string(), comparable)
        })
        .collect()
}

/// Convert a comparable schema (possibly reduced) back into an ordered list
/// of fields for reporting.
pub fn comparable_schema_to_list_schema(schema: &ComparableSchema) -> Vec<TableFieldSchema> {
    schema
        .iter()
        .map(|(name, field)| {
            let attributes = FieldAttributes::from_map(field.attributes.clone());
            TableFieldSchema {
                name: name.clone(),
                field_type: attributes.field_type,
                mode: attributes.mode,
                description: None,
                fields: field.fields.as_ref().map(comparable_schema_to_list_schema),
                extra: attributes.extra,
            }
        })
        .collect()
}
