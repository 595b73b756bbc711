use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for {field} ('{value}'): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Source unavailable after {attempts} attempt(s): {reason}")]
    SourceUnavailable {
        attempts: u32,
        exhausted: bool,
        reason: String,
    },

    #[error("Validation failed: {rejected} of {total} records rejected ({message})")]
    ValidationError {
        rejected: usize,
        total: usize,
        message: String,
    },

    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    #[error("Artifact write failed after {attempts} attempt(s): {reason}")]
    StorageWriteError {
        attempts: u32,
        exhausted: bool,
        reason: String,
    },

    #[error("Warehouse unavailable: {message}")]
    WarehouseUnavailable { message: String },

    #[error("Invocation exceeded its {seconds}s timeout")]
    InvocationTimeout { seconds: u64 },

    #[error("Artifact encoding error: {message}")]
    ArtifactError { message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Source,
    Validation,
    Storage,
    Warehouse,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            EtlError::SourceUnavailable { .. } => ErrorCategory::Source,
            EtlError::ValidationError { .. } => ErrorCategory::Validation,
            EtlError::StorageError { .. } | EtlError::StorageWriteError { .. } => {
                ErrorCategory::Storage
            }
            EtlError::WarehouseUnavailable { .. } => ErrorCategory::Warehouse,
            EtlError::InvocationTimeout { .. } => ErrorCategory::Timeout,
            EtlError::ArtifactError { .. }
            | EtlError::CsvError(_)
            | EtlError::IoError(_)
            | EtlError::SerializationError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Source | ErrorCategory::Storage | ErrorCategory::Timeout => {
                ErrorSeverity::Medium
            }
            ErrorCategory::Configuration | ErrorCategory::Validation => ErrorSeverity::High,
            ErrorCategory::Warehouse => ErrorSeverity::High,
            ErrorCategory::Internal => ErrorSeverity::Critical,
        }
    }

    /// 是否值得在本地重試（只有單次呼叫層級的暫時性錯誤）
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::StorageError { .. } | EtlError::IoError(_) => true,
            EtlError::SourceUnavailable { exhausted, .. }
            | EtlError::StorageWriteError { exhausted, .. } => !exhausted,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the bucket, object key, endpoint and credential settings"
            }
            ErrorCategory::Source => {
                "The source API did not answer with a JSON array; check its status and retry later"
            }
            ErrorCategory::Validation => {
                "Inspect the rejected records in the logs or switch the invalid-record policy to skip"
            }
            ErrorCategory::Storage => {
                "Verify bucket permissions and connectivity to object storage, then re-run"
            }
            ErrorCategory::Warehouse => {
                "Check the warehouse endpoint and token, then reload the dashboard"
            }
            ErrorCategory::Timeout => "Increase the invocation timeout or check network latency",
            ErrorCategory::Internal => "This looks like a bug; re-run with --verbose and report it",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::SourceUnavailable {
                attempts,
                exhausted: true,
                reason,
            } => format!(
                "Source data could not be fetched after {} attempts: {}",
                attempts, reason
            ),
            EtlError::SourceUnavailable { reason, .. } => {
                format!("Source data could not be fetched: {}", reason)
            }
            EtlError::StorageWriteError {
                attempts, reason, ..
            } => format!(
                "The artifact could not be written ({} attempts): {}",
                attempts, reason
            ),
            EtlError::ValidationError {
                rejected, total, ..
            } => format!(
                "{} of {} records failed validation and the run is configured to stop",
                rejected, total
            ),
            EtlError::WarehouseUnavailable { message } => {
                format!("The warehouse could not be queried: {}", message)
            }
            other => other.to_string(),
        }
    }
}

impl From<arrow::error::ArrowError> for EtlError {
    fn from(err: arrow::error::ArrowError) -> Self {
        EtlError::ArtifactError {
            message: err.to_string(),
        }
    }
}

impl From<parquet::errors::ParquetError> for EtlError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        EtlError::ArtifactError {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
