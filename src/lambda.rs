use ev_elt::config::cloud::{CloudConfig, S3Storage};
use ev_elt::core::etl::run_with_config;
use ev_elt::utils::logger;
use ev_elt::utils::validation::Validate;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};

/// Optional per-invocation overrides of the environment configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Request {
    pub api_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
}

#[derive(Serialize)]
pub struct Response {
    pub message: String,
    pub bucket: String,
    pub key: String,
    pub records_written: usize,
    pub records_dropped: usize,
    pub extracted_at: String,
}

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    tracing::info!("Starting EV extraction Lambda function");

    let request = event.payload;
    let config = CloudConfig::from_env()?.with_overrides(
        request.api_endpoint,
        request.s3_bucket,
        request.s3_key,
    );
    config.validate()?;

    let s3_client = config.s3_client().await;
    let storage = S3Storage::new(s3_client, config.s3_bucket.clone());

    let result = run_with_config(storage, config, false).await.map_err(|e| {
        tracing::error!(
            category = ?e.category(),
            severity = ?e.severity(),
            "❌ Extraction failed: {}",
            e
        );
        e
    })?;

    let response = Response {
        message: format!(
            "Success! Uploaded {} to bucket {}.",
            result.key, result.bucket
        ),
        bucket: result.bucket,
        key: result.key,
        records_written: result.record_count,
        records_dropped: result.dropped_count,
        extracted_at: result.extracted_at.to_rfc3339(),
    };

    tracing::info!("EV extraction Lambda function completed successfully");
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_cloud_logger();

    run(service_fn(function_handler)).await
}
