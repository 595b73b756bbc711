use crate::core::pipeline::{validate_destination, RegistrationPipeline};
use crate::core::{ConfigProvider, InvalidRecordPolicy, Pipeline, Storage};
use crate::domain::model::{Destination, ExtractionResult};
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{validate_range, Validate};
use std::time::Duration;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    /// 執行一次完整的抽取：extract → transform → load
    pub async fn run(&self) -> Result<ExtractionResult> {
        tracing::info!("🚀 Starting extraction run");
        if self.monitor.is_enabled() {
            tracing::debug!("Process stats will be logged per phase");
        }
        self.monitor.log_stats("start");

        let items = self.pipeline.extract().await?;
        self.monitor.log_stats("extract");

        let transformed = self.pipeline.transform(items).await?;
        self.monitor.log_stats("transform");

        let result = self.pipeline.load(transformed).await?;
        self.monitor.log_stats("load");
        self.monitor.log_final_stats();

        tracing::info!(
            "✅ Extraction finished: {} records written, {} dropped → {}/{}",
            result.record_count,
            result.dropped_count,
            result.bucket,
            result.key
        );
        Ok(result)
    }

    /// Like [`run`](Self::run), but gives up with `InvocationTimeout` once `limit` elapses.
    pub async fn run_with_timeout(&self, limit: Option<Duration>) -> Result<ExtractionResult> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.run())
                .await
                .map_err(|_| EtlError::InvocationTimeout {
                    seconds: limit.as_secs(),
                })?,
            None => self.run().await,
        }
    }
}

/// Per-run knobs of an extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOptions {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub invalid_records: InvalidRecordPolicy,
    pub invocation_timeout: Option<Duration>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            invalid_records: InvalidRecordPolicy::Skip,
            invocation_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// A self-contained [`ConfigProvider`] for callers that already hold every value.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub api_endpoint: String,
    pub destination: Destination,
    pub options: ExtractionOptions,
}

impl ConfigProvider for ExtractionSettings {
    fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    fn destination(&self) -> Destination {
        self.destination.clone()
    }

    fn request_timeout(&self) -> Duration {
        self.options.request_timeout
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.options.retry.clone()
    }

    fn invalid_record_policy(&self) -> InvalidRecordPolicy {
        self.options.invalid_records
    }

    fn invocation_timeout(&self) -> Option<Duration> {
        self.options.invocation_timeout
    }
}

impl Validate for ExtractionSettings {
    fn validate(&self) -> Result<()> {
        validate_range(
            "request_timeout",
            self.options.request_timeout.as_secs(),
            1,
            600,
        )?;
        validate_range("retry_attempts", self.options.retry.max_attempts, 1, 10)?;
        validate_destination(self, &self.destination.bucket)
    }
}

/// Runs one extraction from `source_url` into `destination` on `storage`.
pub async fn run_extraction<S: Storage>(
    storage: S,
    source_url: &str,
    destination: &Destination,
    options: ExtractionOptions,
) -> Result<ExtractionResult> {
    let settings = ExtractionSettings {
        api_endpoint: source_url.to_string(),
        destination: destination.clone(),
        options,
    };
    run_with_config(storage, settings, false).await
}

/// 使用任何 ConfigProvider 執行抽取（CLI、Lambda、TOML 共用）
pub async fn run_with_config<S: Storage, C: ConfigProvider>(
    storage: S,
    config: C,
    monitor_enabled: bool,
) -> Result<ExtractionResult> {
    let invocation_timeout = config.invocation_timeout();
    let pipeline = RegistrationPipeline::new(storage, config)?;
    EtlEngine::new_with_monitoring(pipeline, monitor_enabled)
        .run_with_timeout(invocation_timeout)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TransformResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;

    struct SlowPipeline;

    #[async_trait]
    impl Pipeline for SlowPipeline {
        async fn extract(&self) -> Result<Vec<Value>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn transform(&self, _items: Vec<Value>) -> Result<TransformResult> {
            Ok(TransformResult {
                records: Vec::new(),
                rejections: Vec::new(),
                extracted_at: Utc::now(),
            })
        }

        async fn load(&self, result: TransformResult) -> Result<ExtractionResult> {
            Ok(ExtractionResult {
                record_count: 0,
                dropped_count: 0,
                bucket: "ev-raw".to_string(),
                key: "raw/ev.parquet".to_string(),
                extracted_at: result.extracted_at,
                source_url: "http://localhost".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_timeout_reports_invocation_timeout() {
        let engine = EtlEngine::new(SlowPipeline);
        let err = engine
            .run_with_timeout(Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::InvocationTimeout { seconds: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_timeout_completes() {
        let engine = EtlEngine::new(SlowPipeline);
        let result = engine.run_with_timeout(None).await.unwrap();
        assert_eq!(result.record_count, 0);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = ExtractionSettings {
            api_endpoint: "https://data.wa.gov/resource/f6w7-q2d2.json".to_string(),
            destination: Destination::new("ev-raw", "raw/ev_registrations.parquet"),
            options: ExtractionOptions::default(),
        };
        assert!(settings.validate().is_ok());

        settings.api_endpoint = "ftp://data.wa.gov/feed".to_string();
        assert!(settings.validate().is_err());

        settings.api_endpoint = "https://data.wa.gov/resource/f6w7-q2d2.json".to_string();
        settings.destination = Destination::new("ev-raw", "/raw/");
        assert!(matches!(
            settings.validate(),
            Err(EtlError::InvalidConfigValueError { .. })
        ));
    }
}
