use crate::core::artifact::PARQUET_CONTENT_TYPE;
use crate::core::{ConfigProvider, InvalidRecordPolicy, Storage};
use crate::domain::model::Destination;
use crate::utils::error::{EtlError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, Validate};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_ENDPOINT: &str = "https://data.wa.gov/resource/f6w7-q2d2.json";
pub const DEFAULT_S3_KEY: &str = "raw/ev_registrations.parquet";

/// Environment-driven configuration shared by the Lambda function and the trigger server.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_endpoint: String,
    pub s3_bucket: String,
    pub s3_key: String,
    pub s3_region: String,
    pub s3_endpoint_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub on_invalid_record: InvalidRecordPolicy,
    pub invocation_timeout_seconds: u64,
}

fn parsed_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| EtlError::InvalidConfigValueError {
                    field: name.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

impl CloudConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s3_bucket = lookup("S3_BUCKET")
            .filter(|bucket| !bucket.trim().is_empty())
            .ok_or_else(|| EtlError::MissingConfigError {
                field: "S3_BUCKET".to_string(),
            })?;

        Ok(Self {
            api_endpoint: lookup("API_ENDPOINT").unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            s3_bucket,
            s3_key: lookup("S3_KEY").unwrap_or_else(|| DEFAULT_S3_KEY.to_string()),
            s3_region: lookup("S3_REGION").unwrap_or_else(|| "us-west-2".to_string()),
            s3_endpoint_url: lookup("S3_ENDPOINT_URL").filter(|url| !url.is_empty()),
            request_timeout_seconds: parsed_or(&lookup, "REQUEST_TIMEOUT_SECONDS", 30)?,
            retry_attempts: parsed_or(&lookup, "RETRY_ATTEMPTS", 3)?,
            retry_delay_ms: parsed_or(&lookup, "RETRY_DELAY_MS", 500)?,
            on_invalid_record: parsed_or(&lookup, "ON_INVALID_RECORD", InvalidRecordPolicy::Skip)?,
            invocation_timeout_seconds: parsed_or(&lookup, "INVOCATION_TIMEOUT_SECONDS", 300)?,
        })
    }

    /// 套用單次呼叫的覆寫值（Lambda event）
    pub fn with_overrides(
        mut self,
        api_endpoint: Option<String>,
        s3_bucket: Option<String>,
        s3_key: Option<String>,
    ) -> Self {
        if let Some(endpoint) = api_endpoint {
            self.api_endpoint = endpoint;
        }
        if let Some(bucket) = s3_bucket {
            self.s3_bucket = bucket;
        }
        if let Some(key) = s3_key {
            self.s3_key = key;
        }
        self
    }

    pub async fn s3_client(&self) -> S3Client {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.s3_region.clone()))
            .force_path_style(true);
        if let Some(endpoint) = &self.s3_endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        S3Client::from_conf(builder.build())
    }
}

impl ConfigProvider for CloudConfig {
    fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    fn destination(&self) -> Destination {
        Destination::new(self.s3_bucket.clone(), self.s3_key.clone())
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    fn invalid_record_policy(&self) -> InvalidRecordPolicy {
        self.on_invalid_record
    }

    fn invocation_timeout(&self) -> Option<Duration> {
        (self.invocation_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.invocation_timeout_seconds))
    }
}

impl Validate for CloudConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("api_endpoint", &self.api_endpoint)?;
        validation::validate_bucket_name("s3_bucket", &self.s3_bucket)?;
        validation::validate_object_key("s3_key", &self.s3_key)?;
        validate_aws_region("s3_region", &self.s3_region)?;
        if let Some(endpoint) = &self.s3_endpoint_url {
            validation::validate_url("s3_endpoint_url", endpoint)?;
        }
        validation::validate_range("request_timeout_seconds", self.request_timeout_seconds, 1, 600)?;
        validation::validate_range("retry_attempts", self.retry_attempts, 1, 10)?;

        tracing::info!("✅ Cloud configuration validation passed");
        Ok(())
    }
}

fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    validation::validate_non_empty_string(field_name, region)?;

    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens"
                .to_string(),
        });
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

fn s3_error(action: &str, key: &str, err: impl std::error::Error) -> EtlError {
    EtlError::StorageError {
        message: format!("S3 {} failed for {}: {}", action, key, DisplayErrorContext(err)),
    }
}

impl Storage for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("get_object", key, e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| s3_error("read body", key, e))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(PARQUET_CONTENT_TYPE)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| s3_error("put_object", key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(s3_error("head_object", key, err)),
        }
    }

    async fn copy_file(&self, from_key: &str, to_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, from_key))
            .key(to_key)
            .content_type(PARQUET_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| s3_error("copy_object", to_key, e))?;
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("delete_object", key, e))?;
        Ok(())
    }
}
