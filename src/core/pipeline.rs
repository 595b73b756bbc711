use crate::core::artifact::{encode_parquet, artifact_key, new_run_id, ArtifactMetadata};
use crate::core::normalize::normalize_items;
use crate::core::publish::commit_artifact;
use crate::core::{ConfigProvider, InvalidRecordPolicy, Pipeline, Storage};
use crate::domain::model::{ExtractionResult, TransformResult, YearBounds};
use crate::utils::error::{EtlError, Result};
use crate::utils::retry::{retry_with_backoff, AttemptError};
use crate::utils::validation::{validate_bucket_name, validate_object_key, validate_url};
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;

/// 被拒絕的紀錄最多逐筆記錄幾筆
const LOGGED_REJECTIONS: usize = 10;

/// Checks everything the extraction needs before any network call.
pub fn validate_destination<C: ConfigProvider>(config: &C, storage_bucket: &str) -> Result<()> {
    let destination = config.destination();
    validate_url("api_endpoint", config.api_endpoint())?;
    validate_bucket_name("bucket", &destination.bucket)?;
    validate_object_key("object_key", &destination.key)?;

    if storage_bucket != destination.bucket {
        return Err(EtlError::ConfigError {
            message: format!(
                "storage is bound to bucket '{}' but the destination is '{}'",
                storage_bucket, destination.bucket
            ),
        });
    }

    if config.retry_policy().max_attempts == 0 {
        return Err(EtlError::InvalidConfigValueError {
            field: "retry_attempts".to_string(),
            value: "0".to_string(),
            reason: "At least one attempt is required".to_string(),
        });
    }

    Ok(())
}

fn transport_attempt(err: reqwest::Error) -> AttemptError {
    if err.is_builder() || err.is_decode() {
        AttemptError::Permanent(err.to_string())
    } else {
        AttemptError::Transient(err.to_string())
    }
}

fn status_attempt(status: StatusCode, endpoint: &str) -> AttemptError {
    let message = format!("HTTP {} from {}", status, endpoint);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        AttemptError::Transient(message)
    } else {
        AttemptError::Permanent(message)
    }
}

/// Fetch → normalize/validate → Parquet → atomic append-only upload.
pub struct RegistrationPipeline<S: Storage, C: ConfigProvider> {
    pub(crate) storage: S,
    pub(crate) config: C,
    pub(crate) client: Client,
}

impl<S: Storage, C: ConfigProvider> RegistrationPipeline<S, C> {
    /// Fails with a configuration error before any I/O when the destination is unusable.
    pub fn new(storage: S, config: C) -> Result<Self> {
        validate_destination(&config, storage.bucket())?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("ev-elt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            storage,
            config,
            client,
        })
    }

    async fn fetch_once(&self) -> std::result::Result<Vec<Value>, AttemptError> {
        let endpoint = self.config.api_endpoint();
        tracing::debug!("Making API request to: {}", endpoint);

        let response = self
            .client
            .get(endpoint)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_attempt)?;

        let status = response.status();
        tracing::debug!("API response status: {}", status);
        if !status.is_success() {
            return Err(status_attempt(status, endpoint));
        }

        let body = response.bytes().await.map_err(transport_attempt)?;
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|e| AttemptError::Permanent(format!("malformed JSON from {}: {}", endpoint, e)))?;

        match payload {
            Value::Array(items) => Ok(items),
            _ => Err(AttemptError::Permanent(format!(
                "expected a JSON array from {}",
                endpoint
            ))),
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider> Pipeline for RegistrationPipeline<S, C> {
    async fn extract(&self) -> Result<Vec<Value>> {
        tracing::info!("🚀 Fetching registrations from: {}", self.config.api_endpoint());

        let items = retry_with_backoff(&self.config.retry_policy(), "fetch source", |_| {
            self.fetch_once()
        })
        .await
        .map_err(|failure| EtlError::SourceUnavailable {
            attempts: failure.attempts,
            exhausted: failure.exhausted,
            reason: failure.message,
        })?;

        tracing::info!("📊 Fetched {} source elements", items.len());
        Ok(items)
    }

    async fn transform(&self, items: Vec<Value>) -> Result<TransformResult> {
        let extracted_at = Utc::now();
        let total = items.len();
        let (records, rejections) = normalize_items(items, &YearBounds::anchored_at(extracted_at));

        for rejection in rejections.iter().take(LOGGED_REJECTIONS) {
            tracing::warn!("⚠️ Rejected {}", rejection);
        }
        if rejections.len() > LOGGED_REJECTIONS {
            tracing::warn!(
                "⚠️ ... and {} more rejected records",
                rejections.len() - LOGGED_REJECTIONS
            );
        }

        if !rejections.is_empty() && self.config.invalid_record_policy() == InvalidRecordPolicy::Fail {
            return Err(EtlError::ValidationError {
                rejected: rejections.len(),
                total,
                message: rejections[0].to_string(),
            });
        }

        tracing::info!(
            "🔧 Normalized {} records ({} dropped)",
            records.len(),
            rejections.len()
        );

        Ok(TransformResult {
            records,
            rejections,
            extracted_at,
        })
    }

    async fn load(&self, result: TransformResult) -> Result<ExtractionResult> {
        let destination = self.config.destination();
        let run_id = new_run_id();
        let key = artifact_key(&destination.key, result.extracted_at, &run_id);

        if result.records.is_empty() {
            tracing::warn!("📝 No valid records, writing an empty artifact");
        }

        let data = encode_parquet(
            &result.records,
            &ArtifactMetadata {
                extracted_at: result.extracted_at,
                source_url: self.config.api_endpoint().to_string(),
            },
        )?;
        tracing::debug!("Encoded {} records into {} bytes", result.records.len(), data.len());

        commit_artifact(&self.storage, &key, &run_id, &data, &self.config.retry_policy()).await?;

        Ok(ExtractionResult {
            record_count: result.records.len(),
            dropped_count: result.rejections.len(),
            bucket: destination.bucket,
            key,
            extracted_at: result.extracted_at,
            source_url: self.config.api_endpoint().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::decode_parquet;
    use crate::domain::model::Destination;
    use crate::utils::retry::RetryPolicy;
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        bucket: String,
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new(bucket: &str) -> Self {
            Self {
                bucket: bucket.to_string(),
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn get_file(&self, key: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(key).cloned()
        }

        async fn keys(&self) -> Vec<String> {
            let files = self.files.lock().await;
            let mut keys: Vec<String> = files.keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    impl Storage for MockStorage {
        fn bucket(&self) -> &str {
            &self.bucket
        }

        async fn read_file(&self, key: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(key).cloned().ok_or_else(|| EtlError::StorageError {
                message: format!("object not found: {}", key),
            })
        }

        async fn write_file(&self, key: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            let files = self.files.lock().await;
            Ok(files.contains_key(key))
        }

        async fn copy_file(&self, from_key: &str, to_key: &str) -> Result<()> {
            let mut files = self.files.lock().await;
            let data = files.get(from_key).cloned().ok_or_else(|| EtlError::StorageError {
                message: format!("object not found: {}", from_key),
            })?;
            files.insert(to_key.to_string(), data);
            Ok(())
        }

        async fn delete_file(&self, key: &str) -> Result<()> {
            let mut files = self.files.lock().await;
            files.remove(key);
            Ok(())
        }
    }

    struct MockConfig {
        api_endpoint: String,
        destination: Destination,
        invalid_records: InvalidRecordPolicy,
    }

    impl MockConfig {
        fn new(api_endpoint: String) -> Self {
            Self {
                api_endpoint,
                destination: Destination::new("ev-raw", "raw/ev_registrations.parquet"),
                invalid_records: InvalidRecordPolicy::Skip,
            }
        }
    }

    impl ConfigProvider for MockConfig {
        fn api_endpoint(&self) -> &str {
            &self.api_endpoint
        }

        fn destination(&self) -> Destination {
            self.destination.clone()
        }

        fn request_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(3, Duration::from_millis(1))
        }

        fn invalid_record_policy(&self) -> InvalidRecordPolicy {
            self.invalid_records
        }

        fn invocation_timeout(&self) -> Option<Duration> {
            None
        }
    }

    fn registrations() -> Value {
        serde_json::json!([
            {"dol_vehicle_id": "1", "make": "TESLA", "model": "MODEL Y", "model_year": "2022",
             "ev_type": "Battery Electric Vehicle (BEV)", "electric_range": "0",
             "city": "Seattle", "state": "WA"},
            {"dol_vehicle_id": "2", "make": "NISSAN", "model": "LEAF", "model_year": "2019",
             "ev_type": "Battery Electric Vehicle (BEV)", "electric_range": "150",
             "city": "Tacoma", "state": "WA"},
            {"dol_vehicle_id": "3", "make": "TOYOTA", "model": "PRIUS PRIME", "model_year": "1900",
             "ev_type": "Plug-in Hybrid Electric Vehicle (PHEV)", "electric_range": "25",
             "city": "Spokane", "state": "WA"}
        ])
    }

    #[tokio::test]
    async fn test_extract_successful_api_response() {
        let server = MockServer::start_async().await;
        let api_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/resource/f6w7-q2d2.json");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(registrations());
            })
            .await;

        let storage = MockStorage::new("ev-raw");
        let config = MockConfig::new(server.url("/resource/f6w7-q2d2.json"));
        let pipeline = RegistrationPipeline::new(storage, config).unwrap();

        let items = pipeline.extract().await.unwrap();

        api_mock.assert_async().await;
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_extract_retries_server_errors_then_gives_up() {
        let server = MockServer::start_async().await;
        let api_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(500);
            })
            .await;

        let storage = MockStorage::new("ev-raw");
        let pipeline = RegistrationPipeline::new(storage, MockConfig::new(server.url("/"))).unwrap();

        let err = pipeline.extract().await.unwrap_err();

        api_mock.assert_hits_async(3).await;
        assert!(matches!(
            err,
            EtlError::SourceUnavailable {
                attempts: 3,
                exhausted: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_extract_malformed_json_is_not_retried() {
        let server = MockServer::start_async().await;
        let api_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .body("[{\"make\": ");
            })
            .await;

        let pipeline =
            RegistrationPipeline::new(MockStorage::new("ev-raw"), MockConfig::new(server.url("/")))
                .unwrap();
        let err = pipeline.extract().await.unwrap_err();

        api_mock.assert_hits_async(1).await;
        assert!(matches!(
            err,
            EtlError::SourceUnavailable {
                attempts: 1,
                exhausted: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_extract_rejects_non_array_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).json_body(serde_json::json!({"error": "throttled"}));
            })
            .await;

        let pipeline =
            RegistrationPipeline::new(MockStorage::new("ev-raw"), MockConfig::new(server.url("/")))
                .unwrap();
        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, EtlError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_transform_drops_invalid_records_by_default() {
        let pipeline = RegistrationPipeline::new(
            MockStorage::new("ev-raw"),
            MockConfig::new("http://localhost/feed".to_string()),
        )
        .unwrap();

        let items = match registrations() {
            Value::Array(items) => items,
            _ => unreachable!(),
        };
        let result = pipeline.transform(items).await.unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(result.rejections[0].index, 2);
        assert_eq!(result.rejections[0].field, "model_year");
        assert_eq!(result.total(), 3);
    }

    #[tokio::test]
    async fn test_transform_fail_closed_policy() {
        let mut config = MockConfig::new("http://localhost/feed".to_string());
        config.invalid_records = InvalidRecordPolicy::Fail;
        let pipeline = RegistrationPipeline::new(MockStorage::new("ev-raw"), config).unwrap();

        let items = match registrations() {
            Value::Array(items) => items,
            _ => unreachable!(),
        };
        let err = pipeline.transform(items).await.unwrap_err();

        assert!(matches!(
            err,
            EtlError::ValidationError {
                rejected: 1,
                total: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_load_publishes_without_leaving_staging_objects() {
        let storage = MockStorage::new("ev-raw");
        let pipeline = RegistrationPipeline::new(
            storage.clone(),
            MockConfig::new("http://localhost/feed".to_string()),
        )
        .unwrap();

        let items = match registrations() {
            Value::Array(items) => items,
            _ => unreachable!(),
        };
        let transformed = pipeline.transform(items).await.unwrap();
        let result = pipeline.load(transformed).await.unwrap();

        assert_eq!(result.record_count, 2);
        assert_eq!(result.dropped_count, 1);
        assert_eq!(result.bucket, "ev-raw");
        assert!(result.key.starts_with("raw/ev_registrations_"));
        assert!(result.key.ends_with(".parquet"));

        assert_eq!(storage.keys().await, vec![result.key.clone()]);
        let data = storage.get_file(&result.key).await.unwrap();
        let records = decode_parquet(bytes::Bytes::from(data)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].make, "TESLA");
    }

    #[tokio::test]
    async fn test_new_fails_fast_on_empty_bucket() {
        let mut config = MockConfig::new("http://localhost/feed".to_string());
        config.destination = Destination::new("", "raw/ev.parquet");

        let result = RegistrationPipeline::new(MockStorage::new(""), config);
        assert!(matches!(result, Err(EtlError::MissingConfigError { .. })));
    }

    #[tokio::test]
    async fn test_new_rejects_storage_bound_to_other_bucket() {
        let result = RegistrationPipeline::new(
            MockStorage::new("other-bucket"),
            MockConfig::new("http://localhost/feed".to_string()),
        );
        assert!(matches!(result, Err(EtlError::ConfigError { .. })));
    }
}
