//! Warehouse connections for the presentation layer.
//!
//! Each `connect` returns an owned connection object. Nothing is cached
//! globally; a connection is released when it is dropped.

use crate::config::warehouse::WarehouseConfig;
use crate::core::artifact::{decode_parquet, read_extracted_at, STAGING_SUFFIX};
use crate::domain::model::RegistrationRecord;
use crate::domain::ports::{RegistrationQuery, WarehouseConnection};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_required_field;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn unavailable(message: impl Into<String>) -> EtlError {
    EtlError::WarehouseUnavailable {
        message: message.into(),
    }
}

/// SQL-over-HTTP warehouse (bearer token, JSONCompact-style response).
pub struct HttpWarehouse;

impl HttpWarehouse {
    pub fn connect(config: &WarehouseConfig) -> Result<HttpWarehouseConnection> {
        let url = validate_required_field("warehouse.url", &config.url)?.clone();
        let token = validate_required_field("warehouse.token", &config.token)?.clone();
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable(format!("cannot build HTTP client: {}", e)))?;

        tracing::debug!("Opened warehouse connection to {}", url);
        Ok(HttpWarehouseConnection {
            client,
            url,
            token,
            table: config.table_name().to_string(),
            row_limit: config.row_limit,
        })
    }
}

pub struct HttpWarehouseConnection {
    client: Client,
    url: String,
    token: String,
    table: String,
    row_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CompactResponse {
    meta: Vec<ColumnMeta>,
    data: Vec<Vec<Value>>,
}

impl CompactResponse {
    fn into_rows(self) -> Result<Vec<Map<String, Value>>> {
        let names: Vec<String> = self.meta.into_iter().map(|column| column.name).collect();

        self.data
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                if row.len() != names.len() {
                    return Err(unavailable(format!(
                        "row {} has {} values for {} columns",
                        index,
                        row.len(),
                        names.len()
                    )));
                }
                Ok(names.iter().cloned().zip(row).collect())
            })
            .collect()
    }
}

impl WarehouseConnection for HttpWarehouseConnection {
    fn table(&self) -> &str {
        &self.table
    }

    fn row_limit(&self) -> Option<usize> {
        self.row_limit
    }

    async fn fetch_rows(&self, query: &RegistrationQuery) -> Result<Vec<Map<String, Value>>> {
        let sql = query.to_sql();
        tracing::debug!("Warehouse query: {}", sql);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&json!({ "query": sql }))
            .send()
            .await
            .map_err(|e| unavailable(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("HTTP {}: {}", status, body.trim())));
        }

        let body: CompactResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unexpected response body: {}", e)))?;
        let rows = body.into_rows()?;

        tracing::info!("📥 Warehouse returned {} rows", rows.len());
        Ok(rows)
    }
}

impl Drop for HttpWarehouseConnection {
    fn drop(&mut self) {
        tracing::debug!("Closing warehouse connection to {}", self.url);
    }
}

/// A local directory of extractor artifacts; the newest snapshot is the table.
pub struct ParquetWarehouse;

impl ParquetWarehouse {
    pub async fn connect(config: &WarehouseConfig) -> Result<ParquetWarehouseConnection> {
        let dir = validate_required_field("warehouse.parquet_dir", &config.parquet_dir)?;
        let root = PathBuf::from(dir);

        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| unavailable(format!("cannot open {}: {}", root.display(), e)))?;
        if !metadata.is_dir() {
            return Err(unavailable(format!("{} is not a directory", root.display())));
        }

        tracing::debug!("Opened Parquet warehouse at {}", root.display());
        Ok(ParquetWarehouseConnection {
            root,
            table: config.table_name().to_string(),
            row_limit: config.row_limit,
        })
    }
}

pub struct ParquetWarehouseConnection {
    root: PathBuf,
    table: String,
    row_limit: Option<usize>,
}

/// 遞迴列出所有 .parquet 檔，依相對路徑排序（即 key 順序）
async fn artifact_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut paths = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "parquet")
                && !path.to_string_lossy().ends_with(STAGING_SUFFIX)
            {
                paths.push(path);
            }
        }
    }

    paths.sort();
    Ok(paths)
}

fn record_to_row(record: RegistrationRecord) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("make".to_string(), Value::String(record.make));
    row.insert("model".to_string(), Value::String(record.model));
    row.insert("model_year".to_string(), json!(record.model_year));
    row.insert(
        "ev_type".to_string(),
        Value::String(record.ev_type.code().to_string()),
    );
    row.insert("electric_range".to_string(), json!(record.electric_range));
    row.insert("city".to_string(), Value::String(record.city));
    row.insert("state".to_string(), Value::String(record.state));
    row
}

impl WarehouseConnection for ParquetWarehouseConnection {
    fn table(&self) -> &str {
        &self.table
    }

    fn row_limit(&self) -> Option<usize> {
        self.row_limit
    }

    async fn fetch_rows(&self, query: &RegistrationQuery) -> Result<Vec<Map<String, Value>>> {
        if query.table != self.table {
            return Err(unavailable(format!("unknown table '{}'", query.table)));
        }

        let paths = artifact_paths(&self.root)
            .await
            .map_err(|e| unavailable(format!("cannot list {}: {}", self.root.display(), e)))?;
        tracing::debug!("Found {} artifacts under {}", paths.len(), self.root.display());

        // 每個檔案都是完整快照，只讀最新的一份
        let mut latest: Option<(Option<DateTime<Utc>>, PathBuf, Bytes)> = None;
        for path in paths {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| unavailable(format!("cannot read {}: {}", path.display(), e)))?;
            let data = Bytes::from(data);
            let extracted_at = read_extracted_at(data.clone())
                .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

            let newer = match &latest {
                None => true,
                Some((best_at, best_path, _)) => (extracted_at, &path) > (*best_at, best_path),
            };
            if newer {
                latest = Some((extracted_at, path, data));
            }
        }

        let Some((extracted_at, path, data)) = latest else {
            tracing::info!("📥 Parquet warehouse at {} holds no artifacts", self.root.display());
            return Ok(Vec::new());
        };
        match extracted_at {
            Some(at) => tracing::debug!("Reading snapshot {} extracted at {}", path.display(), at),
            None => tracing::debug!("Reading snapshot {} (no extraction time)", path.display()),
        }

        let records = decode_parquet(data)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;
        let limit = query.limit.unwrap_or(usize::MAX);
        let rows: Vec<Map<String, Value>> =
            records.into_iter().take(limit).map(record_to_row).collect();

        tracing::info!("📥 Parquet warehouse returned {} rows", rows.len());
        Ok(rows)
    }
}

impl Drop for ParquetWarehouseConnection {
    fn drop(&mut self) {
        tracing::debug!("Closing Parquet warehouse at {}", self.root.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_response_zips_columns() {
        let body: CompactResponse = serde_json::from_value(json!({
            "meta": [{"name": "make", "type": "String"}, {"name": "model_year", "type": "Int32"}],
            "data": [["TESLA", 2022], ["KIA", 2019]],
            "rows": 2
        }))
        .unwrap();

        let rows = body.into_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("make"), Some(&json!("KIA")));
        assert_eq!(rows[0].get("model_year"), Some(&json!(2022)));
    }

    #[test]
    fn test_compact_response_rejects_ragged_rows() {
        let body: CompactResponse = serde_json::from_value(json!({
            "meta": [{"name": "make"}, {"name": "model"}],
            "data": [["TESLA"]]
        }))
        .unwrap();

        assert!(matches!(
            body.into_rows(),
            Err(EtlError::WarehouseUnavailable { .. })
        ));
    }

    fn snapshot(makes: &[&str], extracted_at: &str) -> Vec<u8> {
        use crate::core::artifact::{encode_parquet, ArtifactMetadata};
        use crate::domain::model::EvType;

        let records: Vec<RegistrationRecord> = makes
            .iter()
            .map(|make| RegistrationRecord {
                source_id: None,
                make: make.to_string(),
                model: "MODEL".to_string(),
                model_year: 2022,
                ev_type: EvType::BatteryElectric,
                electric_range: 200,
                city: "Seattle".to_string(),
                state: "WA".to_string(),
            })
            .collect();
        let metadata = ArtifactMetadata {
            extracted_at: DateTime::parse_from_rfc3339(extracted_at)
                .unwrap()
                .with_timezone(&Utc),
            source_url: "https://data.wa.gov/resource/f6w7-q2d2.json".to_string(),
        };
        encode_parquet(&records, &metadata).unwrap()
    }

    #[tokio::test]
    async fn test_only_the_newest_snapshot_is_read() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        // 檔名排序與抽取時間相反，以 footer 為準
        std::fs::write(
            raw.join("ev_a.parquet"),
            snapshot(&["TESLA", "KIA", "FORD"], "2026-10-16T10:00:00.000Z"),
        )
        .unwrap();
        std::fs::write(
            raw.join("ev_b.parquet"),
            snapshot(&["TESLA", "KIA"], "2026-10-15T10:00:00.000Z"),
        )
        .unwrap();
        std::fs::write(raw.join("ev_c.parquet.1a2b3c4d.partial"), b"partial").unwrap();

        let connection = ParquetWarehouse::connect(&WarehouseConfig {
            parquet_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ..WarehouseConfig::default()
        })
        .await
        .unwrap();
        let rows = connection
            .fetch_rows(&RegistrationQuery::new(connection.table()))
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get("make"), Some(&json!("FORD")));
    }

    #[tokio::test]
    async fn test_empty_directory_has_no_rows() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let connection = ParquetWarehouse::connect(&WarehouseConfig {
            parquet_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ..WarehouseConfig::default()
        })
        .await
        .unwrap();
        let rows = connection
            .fetch_rows(&RegistrationQuery::new(connection.table()))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let config = WarehouseConfig {
            parquet_dir: Some("/definitely/not/here".to_string()),
            ..WarehouseConfig::default()
        };
        assert!(matches!(
            ParquetWarehouse::connect(&config).await,
            Err(EtlError::WarehouseUnavailable { .. })
        ));
    }
}
