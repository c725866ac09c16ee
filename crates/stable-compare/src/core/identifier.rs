//! Identifier validation and quoting for generated BigQuery SQL.
//!
//! Identifiers (projects, datasets, tables, columns) cannot be passed as query
//! parameters, so every identifier that ends up in SQL goes through
//! [`quote`] first. Anything that could break out of a backtick-quoted
//! identifier is rejected rather than escaped.

use crate::error::{CompareError, Result};

/// Maximum identifier length accepted by the warehouse for table ids.
const MAX_IDENTIFIER_LENGTH: usize = 1024;

/// Validate an identifier for quoting.
///
/// Rejects empty identifiers, identifiers longer than the warehouse limit and
/// identifiers containing backticks, backslashes, null bytes or line breaks.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CompareError::InvalidIdentifier(name.to_string()));
    }

    if name
        .chars()
        .any(|c| matches!(c, '`' | '\\' | '\0' | '\n' | '\r'))
    {
        return Err(CompareError::InvalidIdentifier(name.to_string()));
    }

    Ok(())
}

/// Quote a single identifier with backticks.
///
/// ```ignore
/// assert_eq!(quote("sample_id")?, "`sample_id`");
/// ```
pub fn quote(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name))
}

/// Quote a fully qualified `project.dataset.table` name as one identifier.
pub fn quote_table(project: &str, dataset: &str, table: &str) -> Result<String> {
    validate_identifier(project)?;
    for part in [dataset, table] {
        validate_identifier(part)?;
        if part.contains('.') {
            return Err(CompareError::InvalidIdentifier(part.to_string()));
        }
    }
    Ok(format!("`{}.{}.{}`", project, dataset, table))
}
