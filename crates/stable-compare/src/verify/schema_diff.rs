//! Structural schema comparison.
//!
//! Both schemas are converted to [`ComparableSchema`], compared for equality,
//! and when unequal reduced by deleting everything present and equal on both
//! sides. What remains on each side is a genuine discrepancy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::core::schema::{
    comparable_schema, comparable_schema_to_list_schema, fields_from_wire, ComparableSchema,
    TableFieldSchema,
};

/// Residual schema differences, each side as an ordered field list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Fields (or attributes) prod has that stage lacks or has differently.
    pub stage_missing: Vec<TableFieldSchema>,
    /// Fields (or attributes) stage has that prod lacks or has differently.
    pub stage_extra: Vec<TableFieldSchema>,
}

impl SchemaDiff {
    /// Log the residual in both directions.
    pub fn log(&self, table: &str) {
        if !self.stage_missing.is_empty() {
            warn!(
                "{}: stage should include {}",
                table,
                render_fields(&self.stage_missing)
            );
        }
        if !self.stage_extra.is_empty() {
            warn!(
                "{}: stage should NOT include {}",
                table,
                render_fields(&self.stage_extra)
            );
        }
    }
}

fn render_fields(fields: &[TableFieldSchema]) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| format!("{:?}", fields))
}

/// Compare two warehouse schemas, ignoring field order and descriptions.
///
/// Returns `None` when they are structurally equal.
pub fn diff_schemas(prod: &[TableFieldSchema], stage: &[TableFieldSchema]) -> Option<SchemaDiff> {
    let mut prod = comparable_schema(&fields_from_wire(prod));
    let mut stage = comparable_schema(&fields_from_wire(stage));
    if prod == stage {
        return None;
    }

    deep_del_matching_keys(&mut prod, &mut stage);
    Some(SchemaDiff {
        stage_missing: comparable_schema_to_list_schema(&prod),
        stage_extra: comparable_schema_to_list_schema(&stage),
    })
}

/// Delete every field and attribute present with equal values on both sides,
/// recursing into nested fields and JSON-object attributes. Entries left
/// empty on a side are removed from that side.
pub fn deep_del_matching_keys(prod: &mut ComparableSchema, stage: &mut ComparableSchema) {
    let common: Vec<String> = prod
        .keys()
        .filter(|name| stage.contains_key(*name))
        .cloned()
        .collect();

    for name in common {
        let (Some(p), Some(s)) = (prod.get_mut(&name), stage.get_mut(&name)) else {
            continue;
        };
        if p == s {
            prod.remove(&name);
            stage.remove(&name);
            continue;
        }

        del_matching_attributes(&mut p.attributes, &mut s.attributes);
        if let (Some(pf), Some(sf)) = (p.fields.as_mut(), s.fields.as_mut()) {
            deep_del_matching_keys(pf, sf);
        }
        for field in [&mut *p, &mut *s] {
            if field.fields.as_ref().is_some_and(|f| f.is_empty()) {
                field.fields = None;
            }
        }

        if p.is_empty() {
            prod.remove(&name);
        }
        if s.is_empty() {
            stage.remove(&name);
        }
    }
}

fn del_matching_attributes(a: &mut BTreeMap<String, Value>, b: &mut BTreeMap<String, Value>) {
    let mut left: Map<String, Value> = std::mem::take(a).into_iter().collect();
    let mut right: Map<String, Value> = std::mem::take(b).into_iter().collect();
    del_matching_json(&mut left, &mut right);
    *a = left.into_iter().collect();
    *b = right.into_iter().collect();
}

/// Delete keys with equal values in both objects, recursing into objects.
pub fn del_matching_json(a: &mut Map<String, Value>, b: &mut Map<String, Value>) {
    let common: Vec<String> = a.keys().filter(|k| b.contains_key(*k)).cloned().collect();
    for key in common {
        if let (Some(Value::Object(x)), Some(Value::Object(y))) = (a.get_mut(&key), b.get_mut(&key))
        {
            del_matching_json(x, y);
        }
        if a.get(&key) == b.get(&key) {
            a.remove(&key);
            b.remove(&key);
        }
    }
}
