use crate::config::warehouse::WarehouseConfig;
use crate::core::{ConfigProvider, InvalidRecordPolicy};
use crate::domain::model::Destination;
use crate::utils::error::{EtlError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub validation: Option<ValidationConfig>,
    pub monitoring: Option<MonitoringConfig>,
    pub warehouse: Option<WarehouseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub endpoint: String,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// 本機物件儲存根目錄
    pub output_path: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub on_invalid_record: Option<InvalidRecordPolicy>,
    pub invocation_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

/// A file that only carries the `[warehouse]` section (the dashboard's view of a job file).
#[derive(Debug, Clone, Deserialize)]
struct WarehouseSection {
    warehouse: Option<WarehouseConfig>,
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid"))
}

/// 替換環境變數 (例如 ${WAREHOUSE_TOKEN})，未設定的變數保持原樣
pub fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
}

fn parse_toml<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(&substitute_env_vars(content)).map_err(|e| EtlError::ConfigValidationError {
        field: "toml_parsing".to_string(),
        message: format!("TOML parsing error: {}", e),
    })
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        parse_toml(content)
    }

    /// Reads only the `[warehouse]` section; other sections may be absent.
    pub fn warehouse_from_file<P: AsRef<Path>>(path: P) -> Result<Option<WarehouseConfig>> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        let section: WarehouseSection = parse_toml(&content)?;
        Ok(section.warehouse)
    }

    pub fn output_path(&self) -> &str {
        &self.destination.output_path
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    fn unresolved_placeholder(&self) -> Option<(&'static str, &str)> {
        [
            ("source.endpoint", self.source.endpoint.as_str()),
            ("destination.bucket", self.destination.bucket.as_str()),
            ("destination.key", self.destination.key.as_str()),
        ]
        .into_iter()
        .find(|(_, value)| env_var_pattern().is_match(value))
    }
}

impl ConfigProvider for TomlConfig {
    fn api_endpoint(&self) -> &str {
        &self.source.endpoint
    }

    fn destination(&self) -> Destination {
        Destination::new(self.destination.bucket.clone(), self.destination.key.clone())
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_seconds.unwrap_or(30))
    }

    fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy::new(
            self.source.retry_attempts.unwrap_or(defaults.max_attempts),
            self.source
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
        )
    }

    fn invalid_record_policy(&self) -> InvalidRecordPolicy {
        self.validation
            .as_ref()
            .and_then(|v| v.on_invalid_record)
            .unwrap_or_default()
    }

    fn invocation_timeout(&self) -> Option<Duration> {
        let seconds = self
            .validation
            .as_ref()
            .and_then(|v| v.invocation_timeout_seconds)
            .unwrap_or(300);
        (seconds > 0).then(|| Duration::from_secs(seconds))
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        if let Some((field, value)) = self.unresolved_placeholder() {
            return Err(EtlError::InvalidConfigValueError {
                field: field.to_string(),
                value: value.to_string(),
                reason: "Environment variable is not set".to_string(),
            });
        }

        validation::validate_url("source.endpoint", &self.source.endpoint)?;
        validation::validate_path("destination.output_path", &self.destination.output_path)?;
        validation::validate_bucket_name("destination.bucket", &self.destination.bucket)?;
        validation::validate_object_key("destination.key", &self.destination.key)?;

        if let Some(timeout) = self.source.timeout_seconds {
            validation::validate_range("source.timeout_seconds", timeout, 1, 600)?;
        }
        if let Some(attempts) = self.source.retry_attempts {
            validation::validate_range("source.retry_attempts", attempts, 1, 10)?;
        }
        if let Some(warehouse) = &self.warehouse {
            warehouse.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[pipeline]
name = "ev-registrations"
version = "1.0.0"

[source]
endpoint = "https://data.wa.gov/resource/f6w7-q2d2.json"
retry_attempts = 4

[destination]
output_path = "./output"
bucket = "ev-raw"
key = "raw/ev_registrations.parquet"

[validation]
on_invalid_record = "fail"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = TomlConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.pipeline.name, "ev-registrations");
        assert_eq!(config.retry_policy().max_attempts, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.invalid_record_policy(), InvalidRecordPolicy::Fail);
        assert_eq!(config.destination().bucket, "ev-raw");
        assert!(!config.monitoring_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("EV_TOML_TEST_BUCKET", "ev-landing");

        let content = BASIC.replace("bucket = \"ev-raw\"", "bucket = \"${EV_TOML_TEST_BUCKET}\"");
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.destination.bucket, "ev-landing");

        std::env::remove_var("EV_TOML_TEST_BUCKET");
    }

    #[test]
    fn test_unset_variable_fails_validation() {
        let content = BASIC.replace(
            "https://data.wa.gov/resource/f6w7-q2d2.json",
            "${EV_TOML_TEST_NEVER_SET}",
        );
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(EtlError::InvalidConfigValueError { field, .. }) if field == "source.endpoint"
        ));
    }

    #[test]
    fn test_config_validation() {
        let content = BASIC.replace("bucket = \"ev-raw\"", "bucket = \"\"");
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(EtlError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_warehouse_section_alone() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"
[warehouse]
parquet_dir = "./output/ev-raw"
row_limit = 50
"#,
            )
            .unwrap();

        let warehouse = TomlConfig::warehouse_from_file(temp_file.path())
            .unwrap()
            .unwrap();
        assert_eq!(warehouse.table, None);
        assert_eq!(warehouse.table_name(), "ev_registrations");
        assert_eq!(warehouse.row_limit, Some(50));
        assert_eq!(warehouse.parquet_dir.as_deref(), Some("./output/ev-raw"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.output_path(), "./output");
    }
}
