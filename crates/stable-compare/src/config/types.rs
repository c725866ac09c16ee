//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Number of disjoint sample buckets a large table is split into.
pub const DEFAULT_SAMPLE_BUCKETS: u32 = 100;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Warehouse connection configuration.
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Comparison behavior configuration.
    #[serde(default)]
    pub comparison: ComparisonConfig,
}

/// Warehouse (BigQuery REST) connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Base URL of the REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Project that runs (and pays for) queries. Defaults to the prod project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_project: Option<String>,

    /// Environment variable holding the OAuth bearer token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Bearer token given directly (takes precedence over `access_token_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Request timeout in seconds (default: 300).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Job location, e.g. "US".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("api_url", &self.api_url)
            .field("billing_project", &self.billing_project)
            .field("access_token_env", &self.access_token_env)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("location", &self.location)
            .finish()
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            billing_project: None,
            access_token_env: default_access_token_env(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
            location: None,
        }
    }
}

/// Comparison behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Project holding the production tables.
    #[serde(default = "default_prod_project")]
    pub prod_project: String,

    /// Project holding the staging mirror.
    #[serde(default = "default_stage_project")]
    pub stage_project: String,

    /// Suffix appended to the dataset id on the stage side.
    #[serde(default)]
    pub stage_dataset_suffix: String,

    /// Only datasets whose id ends with this suffix are compared.
    #[serde(default = "default_dataset_suffix")]
    pub dataset_suffix: String,

    /// Allow-list of `dataset.table` names. Empty means every table.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Regex matched against the fully qualified `project.dataset.table`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Number of concurrent table checks and bucket queries.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Timestamp column the tables are partitioned on.
    #[serde(default = "default_partition_column")]
    pub partition_column: String,

    /// Column attributed right after the partition column.
    #[serde(default = "default_environment_column")]
    pub environment_column: String,

    /// JSON string column compared separately from the rest of the row.
    #[serde(default = "default_additional_properties_column")]
    pub additional_properties_column: String,

    /// Column rows are joined on.
    #[serde(default = "default_document_id_column")]
    pub document_id_column: String,

    /// Integer column used to split large tables into buckets.
    #[serde(default = "default_sample_column")]
    pub sample_column: String,

    /// Number of sample buckets for large tables (default: 100).
    #[serde(default = "default_sample_buckets")]
    pub sample_buckets: u32,

    /// `dataset.table` names whose content is compared bucket by bucket.
    #[serde(default = "default_large_tables")]
    pub large_tables: Vec<String>,

    /// `dataset.table` names known to carry the emoji encoding artifact.
    #[serde(default)]
    pub emoji_tables: Vec<String>,

    /// Emoji sequence that one side stores differently.
    #[serde(default = "default_emoji_artifact")]
    pub emoji_artifact: String,

    /// Placeholder the emoji sequence is mapped to.
    #[serde(default = "default_emoji_placeholder")]
    pub emoji_placeholder: String,

    /// Placeholder U+FFFD is mapped to.
    #[serde(default = "default_replacement_placeholder")]
    pub replacement_placeholder: String,

    /// Number of mismatching document ids logged per table.
    #[serde(default = "default_max_logged_mismatches")]
    pub max_logged_mismatches: usize,

    /// Only estimate bytes, never execute content queries.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            prod_project: default_prod_project(),
            stage_project: default_stage_project(),
            stage_dataset_suffix: String::new(),
            dataset_suffix: default_dataset_suffix(),
            tables: Vec::new(),
            filter: None,
            parallelism: default_parallelism(),
            partition_column: default_partition_column(),
            environment_column: default_environment_column(),
            additional_properties_column: default_additional_properties_column(),
            document_id_column: default_document_id_column(),
            sample_column: default_sample_column(),
            sample_buckets: default_sample_buckets(),
            large_tables: default_large_tables(),
            emoji_tables: Vec::new(),
            emoji_artifact: default_emoji_artifact(),
            emoji_placeholder: default_emoji_placeholder(),
            replacement_placeholder: default_replacement_placeholder(),
            max_logged_mismatches: default_max_logged_mismatches(),
            dry_run: false,
        }
    }
}

impl ComparisonConfig {
    /// Whether `dataset.table` is split into sample buckets.
    pub fn is_large_table(&self, short_name: &str) -> bool {
        self.large_tables.iter().any(|t| t == short_name)
    }

    /// Whether `dataset.table` is known to carry the emoji artifact.
    pub fn has_emoji_artifact(&self, short_name: &str) -> bool {
        self.emoji_tables.iter().any(|t| t == short_name)
    }
}

// Default value functions for serde
fn default_api_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_access_token_env() -> String {
    "BIGQUERY_ACCESS_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_prod_project() -> String {
    "moz-fx-data-shared-prod".to_string()
}

fn default_stage_project() -> String {
    "moz-fx-data-shar-nonprod-efed".to_string()
}

fn default_dataset_suffix() -> String {
    "_stable".to_string()
}

fn default_parallelism() -> usize {
    4
}

fn default_partition_column() -> String {
    "submission_timestamp".to_string()
}

fn default_environment_column() -> String {
    "environment".to_string()
}

fn default_additional_properties_column() -> String {
    "additional_properties".to_string()
}

fn default_document_id_column() -> String {
    "document_id".to_string()
}

fn default_sample_column() -> String {
    "sample_id".to_string()
}

fn default_sample_buckets() -> u32 {
    DEFAULT_SAMPLE_BUCKETS
}

fn default_large_tables() -> Vec<String> {
    vec!["telemetry_stable.main_v4".to_string()]
}

fn default_emoji_artifact() -> String {
    "\u{1F600}".to_string()
}

fn default_emoji_placeholder() -> String {
    "??".to_string()
}

fn default_replacement_placeholder() -> String {
    "?".to_string()
}

fn default_max_logged_mismatches() -> usize {
    5
}
