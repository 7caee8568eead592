//! Ingestion settings and per-import overrides

use crate::comparison::DEFAULT_LABEL_FORMAT;
use crate::error::IngestError;
use crate::protocol::DEFAULT_POWER_QUANTUM_W;
use crate::types::TestType;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Processor-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Rounding quantum for protocol inference (W)
    pub protocol_power_quantum_w: u32,
    /// Maximum number of sessions pulled into one comparison
    pub comparison_limit: usize,
    /// Test type for imports that don't specify one
    pub default_test_type: TestType,
    /// strftime pattern for comparison column labels
    pub date_label_format: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            protocol_power_quantum_w: DEFAULT_POWER_QUANTUM_W,
            comparison_limit: 10,
            default_test_type: TestType::default(),
            date_label_format: DEFAULT_LABEL_FORMAT.to_string(),
        }
    }
}

impl IngestConfig {
    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, IngestError> {
        toml::from_str(content).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded ingest config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, IngestError> {
        toml::to_string_pretty(self).map_err(|e| IngestError::Config(e.to_string()))
    }
}

/// Metadata supplied by the caller for a single import.
///
/// Every field overrides what the decoder recovered from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    pub subject_id: Option<Uuid>,
    pub measurement_date: Option<DateTime<FixedOffset>>,
    pub test_type: Option<TestType>,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the session to an existing subject
    pub fn with_subject(mut self, subject_id: Uuid) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_measurement_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.measurement_date = Some(date);
        self
    }

    pub fn with_test_type(mut self, test_type: TestType) -> Self {
        self.test_type = Some(test_type);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.protocol_power_quantum_w, 5);
        assert_eq!(config.comparison_limit, 10);
        assert_eq!(config.default_test_type, TestType::Cycling);
        assert_eq!(config.date_label_format, "%d %b");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml_str(
            r#"
            protocol_power_quantum_w = 10
            default_test_type = "RUNNING"
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol_power_quantum_w, 10);
        assert_eq!(config.default_test_type, TestType::Running);
        assert_eq!(config.comparison_limit, 10);
        assert_eq!(config.date_label_format, "%d %b");
    }

    #[test]
    fn test_invalid_toml() {
        let result = IngestConfig::from_toml_str("comparison_limit = \"many\"");
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let config = IngestConfig {
            comparison_limit: 3,
            date_label_format: "%Y-%m-%d".to_string(),
            ..IngestConfig::default()
        };
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        assert_eq!(IngestConfig::load(file.path()).unwrap(), config);
        assert!(matches!(
            IngestConfig::load(Path::new("/no/such/cpet.toml")),
            Err(IngestError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_import_options_builder() {
        let id = Uuid::new_v4();
        let options = ImportOptions::new()
            .with_subject(id)
            .with_test_type(TestType::Rowing);

        assert_eq!(options.subject_id, Some(id));
        assert_eq!(options.test_type, Some(TestType::Rowing));
        assert_eq!(options.measurement_date, None);
    }
}
