//! Sharded on-disk cache with access-time LRU eviction

use crate::error::{CacheError, Result};
use crate::hash::ContentHash;
use crate::types::{CacheStats, EvictionReport};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Reserved top-level filename, skipped by size, eviction and clear scans
pub const INDEX_FILENAME: &str = "cache_index.json";

/// Fraction of `max_size` an eviction pass shrinks the cache down to
pub const DEFAULT_HEADROOM: f64 = 0.8;

/// Suffix of in-flight files that are renamed into place once complete
const STAGING_SUFFIX: &str = ".partial";

/// Staging files untouched for this long are left over from a dead writer
const STALE_STAGING_AGE: Duration = Duration::from_secs(10 * 60);

/// Per-process sequence that keeps concurrent staging paths apart
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A file found while scanning the cache root
#[derive(Debug)]
struct CachedFile {
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
    modified: SystemTime,
}

impl CachedFile {
    fn is_staging(&self) -> bool {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(STAGING_SUFFIX))
    }

    /// A staging file no writer has touched within `STALE_STAGING_AGE`
    fn is_abandoned(&self, now: SystemTime) -> bool {
        self.is_staging()
            && now
                .duration_since(self.modified)
                .is_ok_and(|age| age >= STALE_STAGING_AGE)
    }
}

/// Result of a recursive scan: every regular file plus every directory below the root
#[derive(Debug, Default)]
struct Scan {
    files: Vec<CachedFile>,
    /// (depth below root, path)
    dirs: Vec<(usize, PathBuf)>,
}

impl Scan {
    fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// A content-addressed cache rooted at a directory
///
/// Nothing but hit/miss counters lives in memory; every query walks or probes
/// the filesystem, so several instances over one root agree on its contents.
pub struct CacheStore {
    /// Directory where cached objects are stored
    root: PathBuf,
    /// Maximum cache size in bytes
    max_size: u64,
    /// Eviction target as a fraction of `max_size`
    headroom: f64,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
    /// Files removed by eviction
    evicted: AtomicU64,
}

impl CacheStore {
    /// Create a cache over `root` holding at most `max_size` bytes
    pub fn new(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
            headroom: DEFAULT_HEADROOM,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Override the eviction headroom ratio (expected in `(0, 1]`)
    pub fn with_headroom(mut self, headroom: f64) -> Self {
        self.headroom = headroom;
        self
    }

    /// Ensure the cache root exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(cache_dir = ?self.root, max_size = self.max_size, "Cache initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Size an eviction pass shrinks the cache to
    pub fn target_size(&self) -> u64 {
        (self.max_size as f64 * self.headroom) as u64
    }

    /// Location of `hash` in the cache; never touches the disk
    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.shard_dir(hash).join(hash.as_str())
    }

    /// Fresh in-flight location for `hash`, next to its final path so it can be renamed into place
    ///
    /// Every call returns a new path, so concurrent writers of one hash never share a file.
    pub fn staging_path(&self, hash: &ContentHash) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.shard_dir(hash).join(format!(
            ".{}.{}.{}{}",
            hash,
            std::process::id(),
            seq,
            STAGING_SUFFIX
        ))
    }

    fn shard_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.shard1()).join(hash.shard2())
    }

    /// True if `path` is a staging file handed out by `staging_path` for `hash`
    fn is_staging_for(&self, hash: &ContentHash, path: &Path) -> bool {
        let prefix = format!(".{}.", hash);
        path.parent() == Some(self.shard_dir(hash).as_path())
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(STAGING_SUFFIX))
    }

    /// Look up `hash`, refreshing its access time on a hit
    pub async fn get(&self, hash: &ContentHash) -> Option<PathBuf> {
        let path = self.path_for(hash);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                let touched = path.clone();
                let touch = tokio::task::spawn_blocking(move || {
                    filetime::set_file_atime(&touched, FileTime::now())
                })
                .await;
                match touch {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(hash = %hash, error = %e, "Failed to refresh access time"),
                    Err(e) => debug!(hash = %hash, error = %e, "Access time update task failed"),
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %hash, "Cache hit");
                Some(path)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %hash, "Cache miss");
                None
            }
        }
    }

    /// Check for `hash` without counting a hit or refreshing recency
    pub async fn contains(&self, hash: &ContentHash) -> bool {
        fs::metadata(self.path_for(hash))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Place `source` into the cache under `hash`, then run an eviction pass
    ///
    /// A source already at the hash's path is taken as in place, and a
    /// staging file for the hash is renamed into place. Anything else is
    /// copied to a staging path first so the final path never holds a partial
    /// file. The entry just placed is never evicted by its own pass, so the
    /// returned path exists when this returns.
    pub async fn add(&self, hash: &ContentHash, source: &Path) -> Result<PathBuf> {
        let dest = self.path_for(hash);

        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!(hash = %hash, error = %e, "Failed to create cache shard directory");
            }
        }

        if source != dest {
            let staging = if self.is_staging_for(hash, source) {
                source.to_path_buf()
            } else {
                self.staging_path(hash)
            };

            if source != staging {
                if let Err(error) = fs::copy(source, &staging).await {
                    let _ = fs::remove_file(&staging).await;
                    return Err(CacheError::Copy {
                        source: source.to_path_buf(),
                        error,
                    });
                }
            }

            if let Err(e) = fs::rename(&staging, &dest).await {
                let _ = fs::remove_file(&staging).await;
                return Err(CacheError::Io(e));
            }
        }

        debug!(hash = %hash, path = ?dest, "Cached object");
        self.evict(Some(dest.as_path())).await;

        Ok(dest)
    }

    /// Delete the entry for `hash`; a missing entry is not an error
    pub async fn remove(&self, hash: &ContentHash) -> Result<()> {
        match fs::remove_file(self.path_for(hash)).await {
            Ok(()) => {
                debug!(hash = %hash, "Removed cache entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Total bytes of every file under the root except the index file
    pub async fn size(&self) -> u64 {
        self.scan().await.total_size()
    }

    /// Delete every cached file, then every directory left empty
    ///
    /// Returns the number of files removed. Failures are logged and skipped.
    pub async fn clear(&self) -> usize {
        let scan = self.scan().await;
        let mut removed = 0;

        for file in &scan.files {
            match fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?file.path, error = %e, "Failed to remove cached file"),
            }
        }

        prune_dirs(scan.dirs).await;
        info!(removed, "Cache cleared");
        removed
    }

    /// Evict least recently accessed files once the cache exceeds `max_size`
    ///
    /// Abandoned staging files go first, then entries oldest access time
    /// first, until the running total drops to `target_size()`. Files that
    /// fail to delete are skipped and do not count towards the total.
    pub async fn evict_if_needed(&self) -> EvictionReport {
        self.evict(None).await
    }

    async fn evict(&self, keep: Option<&Path>) -> EvictionReport {
        let scan = self.scan().await;
        let size_before = scan.total_size();
        let target_size = self.target_size();

        let mut report = EvictionReport {
            size_before,
            size_after: size_before,
            target_size,
            ..Default::default()
        };

        if size_before <= self.max_size {
            return report;
        }

        let now = SystemTime::now();
        let mut candidates: Vec<CachedFile> = scan
            .files
            .into_iter()
            .filter(|file| Some(file.path.as_path()) != keep)
            .filter(|file| !file.is_staging() || file.is_abandoned(now))
            .collect();
        // Abandoned staging files first; stable sort keeps discovery order on ties
        candidates.sort_by_key(|file| (!file.is_staging(), file.accessed));

        remove_oldest(candidates, &mut report).await;

        prune_dirs(scan.dirs).await;
        self.evicted
            .fetch_add(report.removed_files as u64, Ordering::Relaxed);

        info!(
            size_before = report.size_before,
            size_after = report.size_after,
            removed = report.removed_files,
            "Cache eviction finished"
        );

        report
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let scan = self.scan().await;
        CacheStats {
            entries: scan.files.len(),
            total_size: scan.total_size(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Walk the root, collecting regular files and subdirectories
    async fn scan(&self) -> Scan {
        let mut scan = Scan::default();
        let mut pending = vec![(0usize, self.root.clone())];

        while let Some((depth, dir)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!(dir = ?dir, error = %e, "Failed to read cache directory");
                    }
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(dir = ?dir, error = %e, "Failed to read cache directory entry");
                        break;
                    }
                };

                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let path = entry.path();

                if file_type.is_dir() {
                    scan.dirs.push((depth + 1, path.clone()));
                    pending.push((depth + 1, path));
                } else if file_type.is_file() {
                    if depth == 0 && entry.file_name() == INDEX_FILENAME {
                        continue;
                    }
                    let Ok(meta) = entry.metadata().await else {
                        continue;
                    };
                    let accessed = meta
                        .accessed()
                        .or_else(|_| meta.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    scan.files.push(CachedFile {
                        path,
                        size: meta.len(),
                        accessed,
                        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }

        scan
    }
}

/// Delete `candidates` in order until `report.size_after` reaches its target
async fn remove_oldest(candidates: Vec<CachedFile>, report: &mut EvictionReport) {
    for file in candidates {
        if report.size_after <= report.target_size {
            break;
        }

        match fs::remove_file(&file.path).await {
            Ok(()) => {
                report.size_after -= file.size;
                report.removed_files += 1;
                report.freed_bytes += file.size;
                debug!(path = ?file.path, size = file.size, "Evicted cache file");
            }
            Err(e) => {
                debug!(path = ?file.path, error = %e, "Failed to evict cache file");
            }
        }
    }
}

/// Remove directories deepest first; non-empty ones fail and are kept
async fn prune_dirs(mut dirs: Vec<(usize, PathBuf)>) {
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, dir) in dirs {
        let _ = fs::remove_dir(&dir).await;
    }
}
