//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Project queries are billed to.
    pub fn billing_project(&self) -> &str {
        self.warehouse
            .billing_project
            .as_deref()
            .unwrap_or(&self.comparison.prod_project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_yaml_fills_defaults() {
        let config = Config::from_yaml(
            r#"
comparison:
  stage_project: my-stage
  parallelism: 8
  emoji_tables:
    - org_mozilla_fenix_stable.metrics_v1
"#,
        )
        .unwrap();

        assert_eq!(config.comparison.stage_project, "my-stage");
        assert_eq!(config.comparison.prod_project, "moz-fx-data-shared-prod");
        assert_eq!(config.comparison.parallelism, 8);
        assert_eq!(config.comparison.sample_buckets, 100);
        assert!(config
            .comparison
            .has_emoji_artifact("org_mozilla_fenix_stable.metrics_v1"));
        assert!(config.comparison.is_large_table("telemetry_stable.main_v4"));
        assert_eq!(config.billing_project(), "moz-fx-data-shared-prod");
    }

    #[test]
    fn test_from_yaml_rejects_invalid_values() {
        let err = Config::from_yaml("comparison:\n  parallelism: 0\n").unwrap_err();
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "warehouse:").unwrap();
        writeln!(file, "  billing_project: billing").unwrap();
        writeln!(file, "  timeout_secs: 60").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.billing_project(), "billing");
        assert_eq!(config.warehouse.timeout_secs, 60);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("definitely_missing_config.yaml").unwrap_err();
        assert!(matches!(err, crate::error::CompareError::Io(_)));
    }
}
