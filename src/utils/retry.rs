use std::future::Future;
use std::time::Duration;

/// 有上限的指數退避設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// 第 `attempt` 次失敗後要等待的時間（attempt 從 1 開始）
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// 單次嘗試的失敗分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Transient(String),
    Permanent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub exhausted: bool,
    pub message: String,
}

/// Runs `operation` until it succeeds, fails permanently, or the policy runs out of attempts.
///
/// The closure receives the 1-based attempt number. Sleeps only happen between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("✅ {} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(AttemptError::Permanent(message)) => {
                tracing::error!(
                    "❌ {} failed permanently on attempt {}: {}",
                    operation_name,
                    attempt,
                    message
                );
                return Err(RetryFailure {
                    attempts: attempt,
                    exhausted: false,
                    message,
                });
            }
            Err(AttemptError::Transient(message)) if attempt >= max_attempts => {
                tracing::error!(
                    "❌ {} failed after {} attempts: {}",
                    operation_name,
                    attempt,
                    message
                );
                return Err(RetryFailure {
                    attempts: attempt,
                    exhausted: true,
                    message,
                });
            }
            Err(AttemptError::Transient(message)) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "🔄 {} attempt {}/{} failed: {} (retrying in {:?})",
                    operation_name,
                    attempt,
                    max_attempts,
                    message,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
