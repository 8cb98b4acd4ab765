//! Read-through/write-through storage over the object client and disk cache

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use offhost_cache::{CacheStore, ContentHash};
use s3_object_client::S3Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// The storage capability a host application plugs in
///
/// Failures are reported, never raised: transport problems come back as
/// `Err`/`false`/`None` and are logged, so one failed transfer does not take
/// down the caller.
#[async_trait]
pub trait HashedFileStorage: Send + Sync {
    /// Persist the file at `path` under `hash`
    async fn store_file(&self, hash: &ContentHash, path: &Path) -> Result<()>;

    /// Persist an in-memory buffer under `hash`
    async fn store_bytes(&self, hash: &ContentHash, data: &[u8]) -> Result<()>;

    /// Local path holding the content for `hash`
    ///
    /// On a cache miss the object is downloaded only if
    /// `fetch_remote_if_missing` is set. Any failure is a miss.
    async fn fetch(&self, hash: &ContentHash, fetch_remote_if_missing: bool) -> Option<PathBuf>;

    /// Whether an object is stored under `hash`
    ///
    /// A local cache entry answers without a round trip; only a miss asks the
    /// remote store. An object deleted through another host can therefore
    /// still read as present here until this cache drops it.
    async fn exists(&self, hash: &ContentHash) -> bool;

    async fn delete(&self, hash: &ContentHash) -> Result<()>;
}

/// Remote object store fronted by a bounded disk cache
pub struct ObjectStorage {
    bucket: String,
    cache: CacheStore,
    client: S3Client,
}

impl ObjectStorage {
    /// Validate `config`, create the cache root and build the object client
    pub async fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let client = S3Client::new(config.client_config())?;
        let cache = CacheStore::new(config.cache_dir.clone(), config.max_cache_size)
            .with_headroom(config.eviction_headroom);
        cache.init().await?;

        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint,
            cache_dir = ?config.cache_dir,
            "Object storage ready"
        );

        Ok(Self {
            bucket: config.bucket,
            cache,
            client,
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(&self, hash: &ContentHash, path: &Path) -> Result<()> {
        self.client
            .put(&self.bucket, &hash.object_key(), path)
            .await
            .map_err(|e| {
                warn!(hash = %hash, error = %e, "Failed to upload object");
                StorageError::Transport(e)
            })
    }

    /// Seed the cache after a successful upload; the upload stands either way
    async fn seed(&self, hash: &ContentHash, path: &Path) {
        if let Err(e) = self.cache.add(hash, path).await {
            warn!(hash = %hash, error = %e, "Failed to seed cache after upload");
        }
    }
}

#[async_trait]
impl HashedFileStorage for ObjectStorage {
    async fn store_file(&self, hash: &ContentHash, path: &Path) -> Result<()> {
        self.upload(hash, path).await?;
        self.seed(hash, path).await;
        debug!(hash = %hash, "Stored object");
        Ok(())
    }

    async fn store_bytes(&self, hash: &ContentHash, data: &[u8]) -> Result<()> {
        // Staged beside the cache entry so seeding is a rename, not a copy
        let staging = self.cache.staging_path(hash);
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::write(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        if let Err(e) = self.upload(hash, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        self.seed(hash, &staging).await;
        debug!(hash = %hash, size = data.len(), "Stored object");
        Ok(())
    }

    async fn fetch(&self, hash: &ContentHash, fetch_remote_if_missing: bool) -> Option<PathBuf> {
        if let Some(path) = self.cache.get(hash).await {
            return Some(path);
        }
        if !fetch_remote_if_missing {
            return None;
        }

        let staging = self.cache.staging_path(hash);
        if let Some(parent) = staging.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!(hash = %hash, error = %e, "Failed to create cache shard directory");
                return None;
            }
        }

        if let Err(e) = self
            .client
            .get(&self.bucket, &hash.object_key(), &staging)
            .await
        {
            warn!(hash = %hash, error = %e, "Failed to download object");
            return None;
        }

        match self.cache.add(hash, &staging).await {
            Ok(path) => {
                debug!(hash = %hash, "Fetched object into cache");
                Some(path)
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Failed to register downloaded object");
                None
            }
        }
    }

    async fn exists(&self, hash: &ContentHash) -> bool {
        if self.cache.contains(hash).await {
            return true;
        }
        self.client.head(&self.bucket, &hash.object_key()).await
    }

    async fn delete(&self, hash: &ContentHash) -> Result<()> {
        self.client
            .delete(&self.bucket, &hash.object_key())
            .await
            .map_err(|e| {
                warn!(hash = %hash, error = %e, "Failed to delete object");
                StorageError::Transport(e)
            })?;

        // Remote is gone; a stale local copy would keep serving reads
        self.cache.remove(hash).await.map_err(|e| {
            warn!(hash = %hash, error = %e, "Failed to remove cached copy");
            StorageError::Cache(e)
        })?;

        debug!(hash = %hash, "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hash(c: char) -> ContentHash {
        c.to_string().repeat(40).parse().unwrap()
    }

    fn staging_files(storage: &ObjectStorage, hash: &ContentHash) -> usize {
        let shard = storage.cache().path_for(hash);
        let Ok(entries) = std::fs::read_dir(shard.parent().unwrap()) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .count()
    }

    fn remote_path(hash: &ContentHash) -> String {
        format!("/files/{}", hash.object_key())
    }

    fn config(endpoint: &str, cache_dir: &Path) -> StorageConfig {
        StorageConfig {
            access_key: "AKID".to_string(),
            secret_key: "secret".to_string(),
            bucket: "files".to_string(),
            region: "us-east-1".to_string(),
            endpoint: endpoint.to_string(),
            cdn_endpoint: None,
            cache_dir: cache_dir.to_path_buf(),
            max_cache_size: 1024 * 1024,
            eviction_headroom: 0.8,
        }
    }

    async fn storage(server: &MockServer) -> (ObjectStorage, TempDir) {
        let dir = tempdir().unwrap();
        let storage = ObjectStorage::new(config(&server.uri(), &dir.path().join("cache")))
            .await
            .unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn test_new_rejects_missing_config() {
        let dir = tempdir().unwrap();
        let mut config = config("https://s3.example.com", dir.path());
        config.bucket = String::new();

        let result = ObjectStorage::new(config).await;
        assert!(matches!(result, Err(StorageError::Config(msg)) if msg.contains("bucket")));
    }

    #[tokio::test]
    async fn test_store_file_uploads_then_seeds_cache() {
        let server = MockServer::start().await;
        let h = hash('a');
        Mock::given(method("PUT"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let (storage, dir) = storage(&server).await;

        let source = dir.path().join("upload.bin");
        std::fs::write(&source, b"file body").unwrap();

        storage.store_file(&h, &source).await.unwrap();

        let cached = storage.cache().get(&h).await.unwrap();
        assert_eq!(std::fs::read(cached).unwrap(), b"file body");
    }

    #[tokio::test]
    async fn test_store_file_failure_does_not_seed() {
        let server = MockServer::start().await;
        let h = hash('b');
        Mock::given(method("PUT"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let (storage, dir) = storage(&server).await;

        let source = dir.path().join("upload.bin");
        std::fs::write(&source, b"file body").unwrap();

        let err = storage.store_file(&h, &source).await.unwrap_err();
        assert!(matches!(err, StorageError::Transport(_)));
        assert!(err.to_string().contains("403"));
        assert!(!storage.cache().contains(&h).await);
    }

    #[tokio::test]
    async fn test_store_bytes_places_entry_without_staging_leftovers() {
        let server = MockServer::start().await;
        let h = hash('c');
        Mock::given(method("PUT"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let (storage, _dir) = storage(&server).await;

        storage.store_bytes(&h, b"in memory").await.unwrap();

        let cached = storage.cache().path_for(&h);
        assert_eq!(std::fs::read(&cached).unwrap(), b"in memory");
        assert_eq!(staging_files(&storage, &h), 0);
    }

    #[tokio::test]
    async fn test_store_bytes_failure_cleans_up() {
        let server = MockServer::start().await;
        let h = hash('d');
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (storage, _dir) = storage(&server).await;

        assert!(storage.store_bytes(&h, b"in memory").await.is_err());
        assert!(!storage.cache().contains(&h).await);
        assert_eq!(staging_files(&storage, &h), 0);
    }

    #[tokio::test]
    async fn test_fetch_cached_without_remote() {
        let server = MockServer::start().await;
        let (storage, dir) = storage(&server).await;
        let h = hash('e');

        let source = dir.path().join("seed");
        std::fs::write(&source, b"seeded").unwrap();
        storage.cache().add(&h, &source).await.unwrap();

        let path = storage.fetch(&h, false).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"seeded");
    }

    #[tokio::test]
    async fn test_fetch_miss_without_remote() {
        let server = MockServer::start().await;
        let (storage, _dir) = storage(&server).await;

        assert!(storage.fetch(&hash('f'), false).await.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_downloads_once_then_hits_cache() {
        let server = MockServer::start().await;
        let h = hash('1');
        Mock::given(method("GET"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        let (storage, _dir) = storage(&server).await;

        let first = storage.fetch(&h, true).await.unwrap();
        assert_eq!(first, storage.cache().path_for(&h));
        assert_eq!(std::fs::read(&first).unwrap(), b"remote body");

        let second = storage.fetch(&h, true).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_large_download_survives_eviction() {
        let server = MockServer::start().await;
        let h = hash('8');
        Mock::given(method("GET"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'z'; 950]))
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();
        let mut config = config(&server.uri(), &dir.path().join("cache"));
        config.max_cache_size = 1000;
        let storage = ObjectStorage::new(config).await.unwrap();

        let old = hash('9');
        let source = dir.path().join("seed");
        std::fs::write(&source, vec![b'o'; 100]).unwrap();
        storage.cache().add(&old, &source).await.unwrap();
        let old_time = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_atime(storage.cache().path_for(&old), old_time).unwrap();

        // 1050 bytes against a 1000-byte budget and an 800-byte target
        let fetched = storage.fetch(&h, true).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap().len(), 950);
        assert!(!storage.cache().contains(&old).await);
    }

    #[tokio::test]
    async fn test_fetch_remote_failure_is_a_miss() {
        let server = MockServer::start().await;
        let h = hash('2');
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (storage, _dir) = storage(&server).await;

        assert!(storage.fetch(&h, true).await.is_none());
        assert!(!storage.cache().path_for(&h).exists());
        assert_eq!(staging_files(&storage, &h), 0);
    }

    #[tokio::test]
    async fn test_exists_prefers_cache_then_head() {
        let server = MockServer::start().await;
        let remote_only = hash('3');
        Mock::given(method("HEAD"))
            .and(path(remote_path(&remote_only)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let (storage, dir) = storage(&server).await;

        let cached = hash('4');
        let source = dir.path().join("seed");
        std::fs::write(&source, b"x").unwrap();
        storage.cache().add(&cached, &source).await.unwrap();

        assert!(storage.exists(&cached).await);
        assert!(storage.exists(&remote_only).await);
        assert!(!storage.exists(&hash('5')).await);
    }

    #[tokio::test]
    async fn test_delete_removes_remote_and_cached_copy() {
        let server = MockServer::start().await;
        let h = hash('6');
        Mock::given(method("DELETE"))
            .and(path(remote_path(&h)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let (storage, dir) = storage(&server).await;

        let source = dir.path().join("seed");
        std::fs::write(&source, b"x").unwrap();
        storage.cache().add(&h, &source).await.unwrap();

        storage.delete(&h).await.unwrap();
        assert!(!storage.cache().contains(&h).await);
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_cached_copy() {
        let server = MockServer::start().await;
        let h = hash('7');
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (storage, dir) = storage(&server).await;

        let source = dir.path().join("seed");
        std::fs::write(&source, b"x").unwrap();
        storage.cache().add(&h, &source).await.unwrap();

        assert!(storage.delete(&h).await.is_err());
        assert!(storage.cache().contains(&h).await);
    }
}
