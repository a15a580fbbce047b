//! Key-value persistence and the credential namespace layered on top of it.

pub mod credentials;

pub use credentials::CredentialStore;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

const STORAGE_FILE_VERSION: u32 = 1;

/// Async string key-value storage, the shape of a browser's `localStorage`.
///
/// Every call is a suspension point for the flows that use it.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, FlowError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), FlowError>;
    async fn remove_item(&self, key: &str) -> Result<(), FlowError>;
}

/// Process-local storage; the default when nothing durable is configured.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, FlowError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), FlowError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), FlowError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// File-backed storage: one TOML document holding every item.
///
/// Writes are serialized through an async lock so concurrent removals
/// issued as one batch do not lose each other's updates.
///
/// # Example
/// ```no_run
/// use passflow::storage::{FileStorage, KeyValueStorage};
///
/// # async fn example() -> Result<(), passflow::error::FlowError> {
/// let storage = FileStorage::new_default();
/// storage.set_item("greeting", "hello").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn new_default() -> Self {
        Self::new(crate::config::FlowConfig::default_storage_dir().join("storage.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<StorageFile, FlowError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StorageFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_file(&self, mut file: StorageFile) -> Result<(), FlowError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        file.version = STORAGE_FILE_VERSION;
        file.saved_at = Some(Utc::now());
        let serialized = toml::to_string(&file)?;
        tokio::fs::write(&self.path, serialized).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, FlowError> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_file().await?.items.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), FlowError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        file.items.insert(key.to_string(), value.to_string());
        self.write_file(file).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), FlowError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        if file.items.remove(key).is_none() {
            return Ok(());
        }
        self.write_file(file).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    items: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        storage.set_item("a.b", "1").await.unwrap();
        assert_eq!(storage.get_item("a.b").await.unwrap().as_deref(), Some("1"));
        storage.remove_item("a.b").await.unwrap();
        assert!(storage.get_item("a.b").await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn file_storage_persists_dotted_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.toml");
        let storage = FileStorage::new(&path);
        storage
            .set_item("CognitoIdentityServiceProvider.client.LastAuthUser", "alice")
            .await
            .unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened
                .get_item("CognitoIdentityServiceProvider.client.LastAuthUser")
                .await
                .unwrap()
                .as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn file_storage_concurrent_removals_all_apply() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.toml"));
        for i in 0..8 {
            storage.set_item(&format!("k{i}"), "v").await.unwrap();
        }
        let removals = (0..8).map(|i| {
            let storage = &storage;
            async move { storage.remove_item(&format!("k{i}")).await }
        });
        for result in futures::future::join_all(removals).await {
            result.unwrap();
        }
        for i in 0..8 {
            assert!(storage.get_item(&format!("k{i}")).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn file_storage_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.toml"));
        assert!(storage.get_item("x").await.unwrap().is_none());
        storage.remove_item("x").await.unwrap();
        assert!(!storage.path().exists());
    }
}
