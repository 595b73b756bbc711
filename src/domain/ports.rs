use crate::domain::model::{Destination, ExtractionResult, TransformResult};
use crate::utils::error::Result;
use crate::utils::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;

/// Object storage bound to one bucket. Keys are bucket-relative.
pub trait Storage: Send + Sync {
    fn bucket(&self) -> &str;
    fn read_file(&self, key: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(&self, key: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
    fn copy_file(&self, from_key: &str, to_key: &str) -> impl Future<Output = Result<()>> + Send;
    fn delete_file(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// 失敗的紀錄要略過（fail-open）還是中止整批（fail-closed）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRecordPolicy {
    #[default]
    Skip,
    Fail,
}

impl std::fmt::Display for InvalidRecordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidRecordPolicy::Skip => f.write_str("skip"),
            InvalidRecordPolicy::Fail => f.write_str("fail"),
        }
    }
}

impl std::str::FromStr for InvalidRecordPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" | "drop" | "fail-open" => Ok(InvalidRecordPolicy::Skip),
            "fail" | "reject" | "fail-closed" => Ok(InvalidRecordPolicy::Fail),
            other => Err(format!(
                "unknown invalid-record policy '{}', expected 'skip' or 'fail'",
                other
            )),
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    fn api_endpoint(&self) -> &str;
    fn destination(&self) -> Destination;
    fn request_timeout(&self) -> Duration;
    fn retry_policy(&self) -> RetryPolicy;
    fn invalid_record_policy(&self) -> InvalidRecordPolicy;
    fn invocation_timeout(&self) -> Option<Duration>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<Value>>;
    async fn transform(&self, items: Vec<Value>) -> Result<TransformResult>;
    async fn load(&self, result: TransformResult) -> Result<ExtractionResult>;
}

/// The fixed, bounded-column read issued by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationQuery {
    pub table: String,
    pub limit: Option<usize>,
}

impl RegistrationQuery {
    pub const COLUMNS: [&'static str; 7] = [
        "make",
        "model",
        "model_year",
        "ev_type",
        "electric_range",
        "city",
        "state",
    ];

    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::COLUMNS.join(", "),
            self.table
        );
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

/// An explicit, caller-owned warehouse connection. Released on drop.
pub trait WarehouseConnection: Send + Sync {
    fn table(&self) -> &str;
    fn row_limit(&self) -> Option<usize>;
    fn fetch_rows(
        &self,
        query: &RegistrationQuery,
    ) -> impl Future<Output = Result<Vec<Map<String, Value>>>> + Send;
}
