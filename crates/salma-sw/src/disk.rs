//! JSON-on-disk cache storage.
//!
//! Each store lives in `<root>/<urlencoded name>.json`. Writes go to a
//! temporary file that is renamed over the store file, so a reader never sees
//! a half-written store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheEntry, CacheStorage, RequestKey};
use crate::ServiceWorkerError;

const STORE_EXTENSION: &str = "json";

/// Cache storage persisted as one JSON file per store.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    /// Serializes read-modify-write cycles on store files.
    write_lock: Mutex<()>,
}

impl DiskCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ServiceWorkerError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Disk cache storage ready");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", urlencoding::encode(name), STORE_EXTENSION))
    }

    async fn read_store(&self, name: &str) -> Result<Option<Cache>, ServiceWorkerError> {
        let path = self.store_path(name);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_store(&self, cache: &Cache) -> Result<(), ServiceWorkerError> {
        let path = self.store_path(&cache.name);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(cache)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        let _guard = self.write_lock.lock().await;
        if self.read_store(name).await?.is_none() {
            self.write_store(&Cache::new(name)).await?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(tokio::fs::try_exists(self.store_path(name)).await?)
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        let _guard = self.write_lock.lock().await;
        let mut cache = self
            .read_store(name)
            .await?
            .unwrap_or_else(|| Cache::new(name));
        debug!(store = name, key = %key, "Disk cache put");
        cache.put(key, entry);
        self.write_store(&cache).await
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .read_store(name)
            .await?
            .and_then(|cache| cache.match_request(key).cloned()))
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.store_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(name) => names.push(name.into_owned()),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable store file"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn entry(body: &str) -> CacheEntry {
        CacheEntry {
            url: "https://salma.example/".to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), b"text/html".to_vec())],
            body: body.as_bytes().to_vec(),
            response_type: "basic".to_string(),
            cached_at: 1,
        }
    }

    fn root_key() -> RequestKey {
        RequestKey::get(&Url::parse("https://salma.example/").unwrap())
    }

    #[tokio::test]
    async fn test_open_put_match() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();

        storage.open("salma-organizer-v2").await.unwrap();
        assert!(storage.has("salma-organizer-v2").await.unwrap());

        storage
            .put("salma-organizer-v2", root_key(), entry("<html>"))
            .await
            .unwrap();
        let found = storage
            .match_request("salma-organizer-v2", &root_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, entry("<html>"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            storage.put("v1", root_key(), entry("persisted")).await.unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let found = storage.match_request("v1", &root_key()).await.unwrap();
        assert_eq!(found.unwrap().body, b"persisted".to_vec());
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.open("salma-organizer-v1").await.unwrap();
        storage.open("odd/name v2").await.unwrap();

        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["odd/name v2".to_string(), "salma-organizer-v1".to_string()]
        );

        assert!(storage.delete("salma-organizer-v1").await.unwrap());
        assert!(!storage.delete("salma-organizer-v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["odd/name v2".to_string()]);
    }

    #[tokio::test]
    async fn test_open_keeps_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.put("v1", root_key(), entry("kept")).await.unwrap();
        storage.open("v1").await.unwrap();

        assert!(storage.match_request("v1", &root_key()).await.unwrap().is_some());
    }
}
