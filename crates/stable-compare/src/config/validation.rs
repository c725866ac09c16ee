//! Configuration validation.

use super::Config;
use crate::error::{CompareError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let cmp = &config.comparison;

    if config.warehouse.api_url.is_empty() {
        return Err(CompareError::Config("warehouse.api_url is required".into()));
    }
    if config.warehouse.timeout_secs == 0 {
        return Err(CompareError::Config(
            "warehouse.timeout_secs must be at least 1".into(),
        ));
    }

    if cmp.prod_project.is_empty() {
        return Err(CompareError::Config(
            "comparison.prod_project is required".into(),
        ));
    }
    if cmp.stage_project.is_empty() {
        return Err(CompareError::Config(
            "comparison.stage_project is required".into(),
        ));
    }

    if cmp.prod_project == cmp.stage_project && cmp.stage_dataset_suffix.is_empty() {
        return Err(CompareError::Config(
            "prod and stage resolve to the same tables; set a different stage_project \
             or a stage_dataset_suffix"
                .into(),
        ));
    }

    if cmp.parallelism == 0 {
        return Err(CompareError::Config(
            "comparison.parallelism must be at least 1".into(),
        ));
    }
    if cmp.sample_buckets == 0 {
        return Err(CompareError::Config(
            "comparison.sample_buckets must be at least 1".into(),
        ));
    }

    for (name, value) in [
        ("partition_column", &cmp.partition_column),
        ("document_id_column", &cmp.document_id_column),
        ("sample_column", &cmp.sample_column),
    ] {
        if value.is_empty() {
            return Err(CompareError::Config(format!(
                "comparison.{} is required",
                name
            )));
        }
    }

    if cmp.emoji_artifact.is_empty() {
        return Err(CompareError::Config(
            "comparison.emoji_artifact must not be empty".into(),
        ));
    }

    if let Some(filter) = &cmp.filter {
        regex::Regex::new(filter)?;
    }

    for name in cmp.tables.iter().chain(&cmp.large_tables).chain(&cmp.emoji_tables) {
        if name.split('.').count() != 2 {
            return Err(CompareError::Config(format!(
                "table names must be given as dataset.table, got '{}'",
                name
            )));
        }
    }

    Ok(())
}
