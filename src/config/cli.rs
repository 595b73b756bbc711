use crate::core::Storage;
use crate::utils::error::{EtlError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Filesystem stand-in for an object store: `<base_path>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    bucket: String,
}

impl LocalStorage {
    pub fn new(base_path: impl AsRef<Path>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            root: base_path.as_ref().join(&bucket),
            bucket,
        }
    }

    /// Directory holding this bucket's objects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

// 先寫到同目錄的暫存檔再 rename，避免讀者看到寫一半的檔案
async fn write_then_rename(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl Storage for LocalStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.object_path(key)).await?;
        Ok(data)
    }

    async fn write_file(&self, key: &str, data: &[u8]) -> Result<()> {
        write_then_rename(&self.object_path(key), data).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }

    async fn copy_file(&self, from_key: &str, to_key: &str) -> Result<()> {
        let data = tokio::fs::read(self.object_path(from_key))
            .await
            .map_err(|e| EtlError::StorageError {
                message: format!("cannot read {}: {}", from_key, e),
            })?;
        write_then_rename(&self.object_path(to_key), &data).await
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
