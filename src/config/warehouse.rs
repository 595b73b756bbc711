use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const DEFAULT_TABLE: &str = "ev_registrations";

/// Where the presentation layer reads from.
///
/// Exactly one of `url` (SQL over HTTP, needs `token`) or `parquet_dir`
/// (a local directory of extractor artifacts) must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    /// Unset means [`DEFAULT_TABLE`].
    pub table: Option<String>,
    pub parquet_dir: Option<String>,
    pub row_limit: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*){0,2}$")
            .expect("static regex is valid")
    })
}

impl WarehouseConfig {
    /// 讀取外部管理的密鑰（WAREHOUSE_URL / WAREHOUSE_TOKEN / WAREHOUSE_TABLE）
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            url: non_empty("WAREHOUSE_URL"),
            token: non_empty("WAREHOUSE_TOKEN"),
            table: non_empty("WAREHOUSE_TABLE"),
            parquet_dir: non_empty("WAREHOUSE_PARQUET_DIR"),
            row_limit: non_empty("WAREHOUSE_ROW_LIMIT").and_then(|raw| raw.trim().parse().ok()),
            timeout_seconds: None,
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(DEFAULT_TABLE)
    }

    /// Fills unset fields from `other`.
    pub fn or(self, other: WarehouseConfig) -> Self {
        Self {
            url: self.url.or(other.url),
            token: self.token.or(other.token),
            table: self.table.or(other.table),
            parquet_dir: self.parquet_dir.or(other.parquet_dir),
            row_limit: self.row_limit.or(other.row_limit),
            timeout_seconds: self.timeout_seconds.or(other.timeout_seconds),
        }
    }
}

impl Validate for WarehouseConfig {
    fn validate(&self) -> Result<()> {
        let table = self.table_name();
        if !table_pattern().is_match(table) {
            return Err(EtlError::InvalidConfigValueError {
                field: "warehouse.table".to_string(),
                value: table.to_string(),
                reason: "Table must be a plain (optionally schema-qualified) identifier".to_string(),
            });
        }

        if let Some(limit) = self.row_limit {
            validation::validate_positive_number("warehouse.row_limit", limit, 1)?;
        }

        match (&self.url, &self.parquet_dir) {
            (Some(url), None) => {
                validation::validate_url("warehouse.url", url)?;
                let token = validation::validate_required_field("warehouse.token", &self.token)?;
                validation::validate_non_empty_string("warehouse.token", token)
            }
            (None, Some(dir)) => validation::validate_path("warehouse.parquet_dir", dir),
            (Some(_), Some(_)) => Err(EtlError::ConfigValidationError {
                field: "warehouse".to_string(),
                message: "Set either url or parquet_dir, not both".to_string(),
            }),
            (None, None) => Err(EtlError::MissingConfigError {
                field: "warehouse.url or warehouse.parquet_dir".to_string(),
            }),
        }
    }
}
