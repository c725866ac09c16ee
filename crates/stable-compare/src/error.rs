//! Error types for the comparison library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Exit code for warehouse access errors (metadata, queries, HTTP).
pub const EXIT_REMOTE_ERROR: u8 = 3;

/// Exit code for local IO errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for comparison operations.
#[derive(Error, Debug)]
pub enum CompareError {
    /// Configuration error (invalid YAML, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listing datasets/tables or fetching table metadata failed
    #[error("Remote metadata error ({context}): {message}")]
    RemoteMetadata { context: String, message: String },

    /// Query execution or dry-run estimation failed
    #[error("Query failed ({context}): {message}")]
    Query { context: String, message: String },

    /// Identifier that cannot be safely quoted in SQL
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A single table's check was aborted
    #[error("Check failed for table {table}: {message}")]
    TableCheck { table: String, message: String },

    /// HTTP client construction or transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filter pattern did not compile
    #[error("Invalid filter pattern: {0}")]
    Regex(#[from] regex::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompareError {
    /// Create a RemoteMetadata error with context about which call failed.
    pub fn remote_metadata(context: impl Into<String>, message: impl ToString) -> Self {
        CompareError::RemoteMetadata {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error with context about which query failed.
    pub fn query(context: impl Into<String>, message: impl ToString) -> Self {
        CompareError::Query {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a TableCheck error.
    pub fn table_check(table: impl Into<String>, message: impl ToString) -> Self {
        CompareError::TableCheck {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            CompareError::Config(_) | CompareError::Yaml(_) | CompareError::Regex(_) => {
                EXIT_CONFIG_ERROR
            }
            CompareError::RemoteMetadata { .. }
            | CompareError::Query { .. }
            | CompareError::Http(_) => EXIT_REMOTE_ERROR,
            CompareError::Io(_) => EXIT_IO_ERROR,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for comparison operations.
pub type Result<T> = std::result::Result<T, CompareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(CompareError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            CompareError::remote_metadata("list datasets", "403").exit_code(),
            EXIT_REMOTE_ERROR
        );
        assert_eq!(
            CompareError::query("dry run", "bad sql").exit_code(),
            EXIT_REMOTE_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(CompareError::from(io).exit_code(), EXIT_IO_ERROR);
        assert_eq!(CompareError::table_check("a.b", "panic").exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = CompareError::remote_metadata("get table p.d.t", "not found");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Remote metadata error (get table p.d.t)"));
        assert!(detailed.contains("not found"));
    }
}
