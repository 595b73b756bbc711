use crate::core::artifact::staging_key;
use crate::core::Storage;
use crate::utils::error::{EtlError, Result};
use crate::utils::retry::{retry_with_backoff, AttemptError, RetryFailure, RetryPolicy};

fn storage_attempt(err: EtlError) -> AttemptError {
    if err.is_retryable() {
        AttemptError::Transient(err.to_string())
    } else {
        AttemptError::Permanent(err.to_string())
    }
}

fn write_error(failure: RetryFailure) -> EtlError {
    EtlError::StorageWriteError {
        attempts: failure.attempts,
        exhausted: failure.exhausted,
        reason: failure.message,
    }
}

fn overwrite_refusal(final_key: &str) -> String {
    format!("refusing to overwrite existing artifact {}", final_key)
}

/// Publishes `data` under `final_key` so readers never see a partial object.
///
/// The bytes go to a `.partial` staging key first, then are copied to the final
/// key, which must not exist before the first copy. A retried copy that finds
/// the final key holding exactly `data` treats the earlier attempt as landed.
/// The staging object is removed afterwards.
pub async fn commit_artifact<S: Storage>(
    storage: &S,
    final_key: &str,
    run_id: &str,
    data: &[u8],
    policy: &RetryPolicy,
) -> Result<()> {
    let staging = staging_key(final_key, run_id);
    let staging = staging.as_str();

    let already_present = retry_with_backoff(policy, "check final key", |_| async move {
        storage.exists(final_key).await.map_err(storage_attempt)
    })
    .await
    .map_err(write_error)?;
    if already_present {
        return Err(EtlError::StorageWriteError {
            attempts: 1,
            exhausted: false,
            reason: overwrite_refusal(final_key),
        });
    }

    tracing::debug!("Uploading {} bytes to staging key {}", data.len(), staging);
    let published = retry_with_backoff(policy, "upload staging artifact", |_| async move {
        storage.write_file(staging, data).await.map_err(storage_attempt)
    })
    .await
    .map_err(write_error);

    let published = match published {
        Ok(()) => retry_with_backoff(policy, "publish artifact", |attempt| async move {
            // 前一次 copy 可能已寫入後才回報失敗
            if attempt > 1 && storage.exists(final_key).await.map_err(storage_attempt)? {
                let current = storage.read_file(final_key).await.map_err(storage_attempt)?;
                if current == data {
                    tracing::info!("Final key {} already holds this run's bytes", final_key);
                    return Ok(());
                }
                return Err(AttemptError::Permanent(overwrite_refusal(final_key)));
            }
            storage
                .copy_file(staging, final_key)
                .await
                .map_err(storage_attempt)
        })
        .await
        .map_err(write_error),
        Err(e) => Err(e),
    };

    // 不論發布成功與否都清掉暫存檔
    if let Err(e) = storage.delete_file(staging).await {
        tracing::warn!("⚠️ Could not remove staging object {}: {}", staging, e);
    }

    published?;
    tracing::info!("📦 Published artifact {}/{}", storage.bucket(), final_key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// 可設定失敗次數的記憶體儲存
    #[derive(Clone, Default)]
    struct FlakyStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        failing_writes: Arc<Mutex<u32>>,
        failing_copies: Arc<Mutex<u32>>,
        copy_lands_before_failing: bool,
    }

    impl FlakyStorage {
        async fn with_file(self, key: &str, data: &[u8]) -> Self {
            self.files.lock().await.insert(key.to_string(), data.to_vec());
            self
        }

        async fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.files.lock().await.keys().cloned().collect();
            keys.sort();
            keys
        }

        async fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(key).cloned()
        }
    }

    fn unavailable(action: &str) -> EtlError {
        EtlError::StorageError {
            message: format!("{} failed: connection reset", action),
        }
    }

    async fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    impl Storage for FlakyStorage {
        fn bucket(&self) -> &str {
            "ev-raw"
        }

        async fn read_file(&self, key: &str) -> Result<Vec<u8>> {
            self.get(key).await.ok_or_else(|| EtlError::StorageError {
                message: format!("object not found: {}", key),
            })
        }

        async fn write_file(&self, key: &str, data: &[u8]) -> Result<()> {
            if take_failure(&self.failing_writes).await {
                return Err(unavailable("put"));
            }
            self.files.lock().await.insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.files.lock().await.contains_key(key))
        }

        async fn copy_file(&self, from_key: &str, to_key: &str) -> Result<()> {
            let failing = take_failure(&self.failing_copies).await;
            if failing && !self.copy_lands_before_failing {
                return Err(unavailable("copy"));
            }
            let mut files = self.files.lock().await;
            let data = files.get(from_key).cloned().ok_or_else(|| EtlError::StorageError {
                message: format!("object not found: {}", from_key),
            })?;
            files.insert(to_key.to_string(), data);
            if failing {
                return Err(unavailable("copy"));
            }
            Ok(())
        }

        async fn delete_file(&self, key: &str) -> Result<()> {
            self.files.lock().await.remove(key);
            Ok(())
        }
    }

    const FINAL_KEY: &str = "raw/ev_20261016T101500000Z_1a2b3c4d.parquet";

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_commit_leaves_only_the_final_key() {
        let storage = FlakyStorage::default();

        commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap();

        assert_eq!(storage.keys().await, vec![FINAL_KEY.to_string()]);
        assert_eq!(storage.get(FINAL_KEY).await.as_deref(), Some(&b"snapshot"[..]));
    }

    #[tokio::test]
    async fn test_transient_write_errors_are_retried() {
        let storage = FlakyStorage {
            failing_writes: Arc::new(Mutex::new(2)),
            ..FlakyStorage::default()
        };

        commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap();
        assert_eq!(storage.keys().await, vec![FINAL_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_persistent_write_errors_exhaust_retries() {
        let storage = FlakyStorage {
            failing_writes: Arc::new(Mutex::new(u32::MAX)),
            ..FlakyStorage::default()
        };

        let err = commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EtlError::StorageWriteError {
                attempts: 3,
                exhausted: true,
                ..
            }
        ));
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_final_key_is_never_overwritten() {
        let storage = FlakyStorage::default()
            .with_file(FINAL_KEY, b"earlier run")
            .await;

        let err = commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap_err();

        match err {
            EtlError::StorageWriteError {
                exhausted, reason, ..
            } => {
                assert!(!exhausted);
                assert!(reason.contains("refusing to overwrite"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            storage.get(FINAL_KEY).await.as_deref(),
            Some(&b"earlier run"[..])
        );
        assert_eq!(storage.keys().await, vec![FINAL_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_copy_that_landed_before_failing_counts_as_published() {
        let storage = FlakyStorage {
            failing_copies: Arc::new(Mutex::new(1)),
            copy_lands_before_failing: true,
            ..FlakyStorage::default()
        };

        commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap();

        assert_eq!(storage.keys().await, vec![FINAL_KEY.to_string()]);
        assert_eq!(storage.get(FINAL_KEY).await.as_deref(), Some(&b"snapshot"[..]));
    }

    #[tokio::test]
    async fn test_failed_copy_is_retried() {
        let storage = FlakyStorage {
            failing_copies: Arc::new(Mutex::new(1)),
            ..FlakyStorage::default()
        };

        commit_artifact(&storage, FINAL_KEY, "1a2b3c4d", b"snapshot", &policy())
            .await
            .unwrap();
        assert_eq!(storage.get(FINAL_KEY).await.as_deref(), Some(&b"snapshot"[..]));
    }
}
