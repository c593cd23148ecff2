use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Key/value file storage used by the local command host.
///
/// Keys are `/`-separated relative paths.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;

    /// The location of `path` as seen from outside the storage.
    fn locate(&self, path: &str) -> String;
}

pub async fn read_json<T: DeserializeOwned>(storage: &dyn Storage, path: &str) -> Result<T> {
    let bytes = storage.read(path).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path))
}

pub async fn write_json<T: Serialize>(storage: &dyn Storage, path: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    storage.write(path, content.as_bytes()).await
}

// --- Native Implementation ---

pub struct NativeStorage {
    root: PathBuf,
}

impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        if tokio::fs::try_exists(&full).await? {
            tokio::fs::remove_file(&full)
                .await
                .with_context(|| format!("Failed to delete {}", full.display()))?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    fn locate(&self, path: &str) -> String {
        self.resolve(path).to_string_lossy().to_string()
    }
}
