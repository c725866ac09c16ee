//! JSON canonicalization for order-independent row comparison.
//!
//! Rows from both sides are reduced to a canonical string before they are
//! compared:
//!
//! - Object keys are sorted recursively; array order is kept.
//! - Null members and members that are (or become) empty objects or arrays
//!   are removed. Array elements are stripped internally but never dropped,
//!   since their position is significant.
//! - Optionally, two known encoding artifacts are mapped to placeholders.
//!
//! The additional-properties column is canonicalized (sorted) but keeps its
//! nulls, and is compared on its own.

use serde_json::{Map, Value};

use crate::config::ComparisonConfig;
use crate::error::Result;

/// Unicode replacement character written where input could not be decoded.
pub const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// What a row missing from one side compares as.
pub const MISSING_ROW: &str = "null";

/// Return `value` with every object's keys sorted, recursively.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted keys.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

/// Canonicalize a JSON document given as text.
pub fn canonicalize(json: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json)?;
    Ok(canonical_json(&value))
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Remove null members and empty nested objects/arrays from `value`.
///
/// Scalars are returned unchanged; the top-level value itself is never
/// removed.
pub fn strip_empty(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let stripped: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| {
                    if v.is_null() {
                        return None;
                    }
                    let v = strip_empty(v);
                    if is_empty_container(&v) {
                        None
                    } else {
                        Some((k.clone(), v))
                    }
                })
                .collect();
            Value::Object(stripped)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_empty).collect()),
        other => other.clone(),
    }
}

/// Strip nulls and empties from a JSON document given as text.
pub fn strip_nulls(json: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json)?;
    Ok(strip_empty(&value).to_string())
}

/// Which encoding artifacts to normalize away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NormalizeOptions {
    /// Map the configured emoji sequence to its placeholder.
    pub replace_emoji: bool,
    /// Map U+FFFD to its placeholder.
    pub replace_replacement_char: bool,
}

impl NormalizeOptions {
    /// Human description of the exclusions in effect, for log messages.
    pub fn describe(&self) -> Option<&'static str> {
        match (self.replace_emoji, self.replace_replacement_char) {
            (true, true) => Some("emoji and U+FFFD artifacts"),
            (true, false) => Some("emoji artifacts"),
            (false, true) => Some("U+FFFD artifacts"),
            (false, false) => None,
        }
    }
}

/// A row reduced to its comparable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    /// Canonical, stripped row without the id and additional properties.
    pub content: String,
    /// Canonical additional properties, nulls kept.
    pub additional_properties: String,
}

impl NormalizedRow {
    /// Stand-in for a row absent from one side.
    pub fn missing() -> Self {
        Self {
            content: MISSING_ROW.to_string(),
            additional_properties: MISSING_ROW.to_string(),
        }
    }
}

/// Turns raw row payloads into [`NormalizedRow`]s.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    options: NormalizeOptions,
    id_column: String,
    additional_properties_column: String,
    emoji: String,
    emoji_placeholder: String,
    replacement_placeholder: String,
}

impl RowNormalizer {
    /// Build from comparison settings.
    pub fn new(config: &ComparisonConfig, options: NormalizeOptions) -> Self {
        Self {
            options,
            id_column: config.document_id_column.clone(),
            additional_properties_column: config.additional_properties_column.clone(),
            emoji: config.emoji_artifact.clone(),
            emoji_placeholder: config.emoji_placeholder.clone(),
            replacement_placeholder: config.replacement_placeholder.clone(),
        }
    }

    /// Normalize a row given as a JSON object.
    pub fn normalize(&self, mut row: Map<String, Value>) -> NormalizedRow {
        row.remove(&self.id_column);
        let additional = row
            .remove(&self.additional_properties_column)
            .unwrap_or(Value::Null);

        let content = strip_empty(&sort_keys(&Value::Object(row))).to_string();
        NormalizedRow {
            content: self.replace_artifacts(content),
            additional_properties: canonical_additional_properties(&additional),
        }
    }

    /// Normalize a row given as JSON text.
    pub fn normalize_json(&self, payload: &str) -> Result<NormalizedRow> {
        match serde_json::from_str::<Value>(payload)? {
            Value::Object(map) => Ok(self.normalize(map)),
            other => Ok(NormalizedRow {
                content: self.replace_artifacts(canonical_json(&strip_empty(&other))),
                additional_properties: MISSING_ROW.to_string(),
            }),
        }
    }

    fn replace_artifacts(&self, mut content: String) -> String {
        if self.options.replace_emoji {
            content = content.replace(&self.emoji, &self.emoji_placeholder);
        }
        if self.options.replace_replacement_char {
            content = content.replace(REPLACEMENT_CHAR, &self.replacement_placeholder);
        }
        content
    }
}

/// The additional properties column holds a JSON document as a string.
/// Parse and sort it; keep unparsable text verbatim.
fn canonical_additional_properties(value: &Value) -> String {
    match value {
        Value::Null => MISSING_ROW.to_string(),
        Value::String(text) => canonicalize(text).unwrap_or_else(|_| text.clone()),
        other => canonical_json(other),
    }
}
