//! The HTTP trigger: any request runs one extraction and answers in plain text.

use crate::core::etl::run_with_config;
use crate::core::{ConfigProvider, Storage};
use crate::domain::model::ExtractionResult;
use crate::utils::error::EtlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResponse {
    pub status: u16,
    pub body: String,
}

impl TriggerResponse {
    pub fn success(result: &ExtractionResult) -> Self {
        Self {
            status: 200,
            body: format!(
                "Success! Uploaded {} to bucket {}. Records written: {}, records dropped: {}.",
                result.key, result.bucket, result.record_count, result.dropped_count
            ),
        }
    }

    pub fn failure(err: &EtlError) -> Self {
        Self {
            status: 500,
            body: format!("Error occurred: {}", err.user_friendly_message()),
        }
    }
}

/// Runs the extraction and maps the outcome to a response. Never panics or returns early.
pub async fn handle_trigger<S: Storage, C: ConfigProvider>(storage: S, config: C) -> TriggerResponse {
    match run_with_config(storage, config, false).await {
        Ok(result) => TriggerResponse::success(&result),
        Err(e) => {
            tracing::error!(
                category = ?e.category(),
                severity = ?e.severity(),
                "❌ Triggered extraction failed: {}",
                e
            );
            TriggerResponse::failure(&e)
        }
    }
}

#[cfg(feature = "server")]
pub use server::{router, TriggerState};

#[cfg(feature = "server")]
mod server {
    use super::handle_trigger;
    use crate::config::cloud::{CloudConfig, S3Storage};
    use aws_sdk_s3::Client as S3Client;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Router;
    use std::sync::Arc;

    #[derive(Clone)]
    pub struct TriggerState {
        pub config: Arc<CloudConfig>,
        pub client: S3Client,
    }

    async fn trigger(State(state): State<TriggerState>) -> impl IntoResponse {
        let storage = S3Storage::new(state.client.clone(), state.config.s3_bucket.clone());
        let response = handle_trigger(storage, state.config.as_ref().clone()).await;
        let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, response.body)
    }

    /// 任何方法、任何路徑都觸發一次抽取
    pub fn router(state: TriggerState) -> Router {
        Router::new().fallback(trigger).with_state(state)
    }
}
