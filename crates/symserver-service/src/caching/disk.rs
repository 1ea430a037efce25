//! The on-disk symcache store.
//!
//! Entries live under `<root>/<shard>/<debug_filename>/<debug_id>/<version>/symcache`,
//! with in-progress writes under `<root>/tmp`. Publication is atomic: blobs
//! are written to a temp file, fsynced and renamed into place, so a partially
//! written blob is never observable. A zero-length entry is the negative
//! sentinel for "known missing upstream" and expires after a configured TTL.
//!
//! Recency and total size are tracked in an in-memory index guarded by a
//! single mutex; file I/O happens outside the lock, and file mtimes are never
//! touched on the hot path. The index is rebuilt from the directory tree on
//! startup, which also drops stale temp files and entries of other symcache
//! format versions.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::config::Config;
use crate::symcache::SYMCACHE_VERSION;

use super::CacheKey;

/// The result of a cache read.
#[derive(Debug)]
pub enum GetOutcome {
    /// A symcache blob.
    Hit(Vec<u8>),
    /// A fresh negative sentinel: the module is known to be missing upstream.
    Negative,
    Miss,
}

#[derive(Debug, Clone)]
struct EntryMeta {
    size: u64,
    /// Logical access clock, larger is more recent.
    last_used: u64,
    /// Number of in-flight requests holding this entry.
    readers: u32,
    /// Set for negative sentinels, recording when the miss was observed.
    negative_since: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<CacheKey, EntryMeta>,
    total_bytes: u64,
    clock: u64,
}

impl Index {
    fn touch(&mut self, key: &CacheKey) {
        self.clock += 1;
        if let Some(meta) = self.entries.get_mut(key) {
            meta.last_used = self.clock;
        }
    }

    fn insert(&mut self, key: CacheKey, size: u64, negative_since: Option<SystemTime>) {
        self.clock += 1;
        let meta = EntryMeta {
            size,
            last_used: self.clock,
            readers: 0,
            negative_since,
        };
        if let Some(old) = self.entries.insert(key, meta) {
            self.total_bytes -= old.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, key: &CacheKey) -> Option<EntryMeta> {
        let meta = self.entries.remove(key)?;
        self.total_bytes -= meta.size;
        Some(meta)
    }
}

#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    tmp_dir: PathBuf,
    max_size_bytes: u64,
    low_water_bytes: u64,
    retry_misses_after: Duration,
    index: Mutex<Index>,
}

impl DiskCache {
    /// Opens the cache below `config.cache_dir`.
    ///
    /// This clears leftover temp files and, unless disabled, rebuilds the
    /// entry index from the directory tree.
    pub fn new(config: &Config) -> io::Result<Arc<Self>> {
        let root = config.cache_dir.clone();
        let tmp_dir = root.join("tmp");

        fs::create_dir_all(&root)?;
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let cache = DiskCache {
            root,
            tmp_dir,
            max_size_bytes: config.cache.max_size_bytes,
            low_water_bytes: config.cache.low_water_bytes(),
            retry_misses_after: config.cache.retry_misses_after,
            index: Mutex::new(Index::default()),
        };

        if config.cache.warm_scan {
            cache.warm_scan()?;
            metric!(gauge("diskcache.usage") = cache.total_bytes());
        }

        Ok(Arc::new(cache))
    }

    /// Total size of all entries, in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().unwrap().total_bytes
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.cache_path(SYMCACHE_VERSION))
    }

    /// Reads the entry for `key`.
    ///
    /// A hit bumps the in-memory recency of the entry. Filesystem errors are
    /// logged and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> GetOutcome {
        let start = Instant::now();
        let (outcome, result) = self.get_inner(key).await;
        metric!(timer("diskcache.get") = start.elapsed(), "result" => result);
        outcome
    }

    async fn get_inner(&self, key: &CacheKey) -> (GetOutcome, &'static str) {
        enum IndexState {
            Absent,
            NegativeFresh,
            NegativeExpired,
            Positive,
        }

        let state = {
            let mut index = self.index.lock().unwrap();
            match index.entries.get(key) {
                None => IndexState::Absent,
                Some(meta) => match meta.negative_since {
                    Some(since) => {
                        let expired = since
                            .elapsed()
                            .map_or(true, |age| age > self.retry_misses_after);
                        if expired {
                            index.remove(key);
                            IndexState::NegativeExpired
                        } else {
                            index.touch(key);
                            IndexState::NegativeFresh
                        }
                    }
                    None => {
                        index.touch(key);
                        IndexState::Positive
                    }
                },
            }
        };

        let path = self.entry_path(key);
        match state {
            IndexState::Absent => return (GetOutcome::Miss, "miss"),
            IndexState::NegativeFresh => return (GetOutcome::Negative, "hit"),
            IndexState::NegativeExpired => {
                self.remove_entry_file(&path);
                return (GetOutcome::Miss, "miss");
            }
            IndexState::Positive => {}
        }

        match tokio::fs::read(&path).await {
            Ok(data) => (GetOutcome::Hit(data), "hit"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.index.lock().unwrap().remove(key);
                (GetOutcome::Miss, "miss")
            }
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "failed to read cache entry",
                );
                (GetOutcome::Miss, "error")
            }
        }
    }

    /// Publishes a symcache blob for `key`.
    pub fn put(&self, key: &CacheKey, data: &[u8]) -> io::Result<()> {
        self.put_inner(key, data, None)
    }

    /// Publishes a negative sentinel for `key`.
    pub fn put_negative(&self, key: &CacheKey) -> io::Result<()> {
        self.put_inner(key, &[], Some(SystemTime::now()))
    }

    fn put_inner(
        &self,
        key: &CacheKey,
        data: &[u8],
        negative_since: Option<SystemTime>,
    ) -> io::Result<()> {
        let start = Instant::now();
        let result = self.write_entry(key, data, negative_since);
        metric!(
            timer("diskcache.set") = start.elapsed(),
            "result" => if result.is_ok() { "success" } else { "fail" },
        );
        if result.is_ok() {
            self.evict_if_needed();
        }
        result
    }

    fn write_entry(
        &self,
        key: &CacheKey,
        data: &[u8],
        negative_since: Option<SystemTime>,
    ) -> io::Result<()> {
        let mut temp_file = tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(&self.tmp_dir)?;
        temp_file.write_all(data)?;
        temp_file.as_file().sync_all()?;

        let path = self.entry_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("entry path has no parent directory"))?;
        fs::create_dir_all(parent)?;

        match temp_file.persist_noclobber(&path) {
            Ok(_) => {
                let mut index = self.index.lock().unwrap();
                index.insert(key.clone(), data.len() as u64, negative_since);
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                // a concurrent writer won the rename, discard our temp file
                tracing::trace!(%key, "lost cache publication race");
                Ok(())
            }
            Err(e) => Err(e.error),
        }
    }

    /// Drops the entry for `key`, e.g. after its blob failed to load.
    pub fn remove(&self, key: &CacheKey) {
        self.index.lock().unwrap().remove(key);
        self.remove_entry_file(&self.entry_path(key));
    }

    /// Pins the entry for `key` against eviction until the lease is dropped.
    pub fn pin(self: &Arc<Self>, key: &CacheKey) -> CacheLease {
        if let Some(meta) = self.index.lock().unwrap().entries.get_mut(key) {
            meta.readers += 1;
        }
        CacheLease {
            cache: Arc::clone(self),
            key: key.clone(),
        }
    }

    /// Evicts least-recently-used entries until the total size is back under
    /// the low-water mark.
    ///
    /// Entries currently held by a request are skipped and reconsidered on the
    /// next pass.
    fn evict_if_needed(&self) {
        let victims = {
            let mut index = self.index.lock().unwrap();
            if index.total_bytes <= self.max_size_bytes {
                return;
            }

            let mut candidates: Vec<(CacheKey, u64)> = index
                .entries
                .iter()
                .filter(|(_, meta)| meta.readers == 0)
                .map(|(key, meta)| (key.clone(), meta.last_used))
                .collect();
            candidates.sort_by_key(|(_, last_used)| *last_used);

            let mut victims = Vec::new();
            for (key, _) in candidates {
                if index.total_bytes <= self.low_water_bytes {
                    break;
                }
                index.remove(&key);
                victims.push(key);
            }
            victims
        };

        for key in &victims {
            self.remove_entry_file(&self.entry_path(key));
        }

        if !victims.is_empty() {
            metric!(counter("diskcache.evict") += victims.len() as i64);
            metric!(gauge("diskcache.usage") = self.total_bytes());
            tracing::debug!(evicted = victims.len(), "evicted cache entries");
        }
    }

    /// Expires stale negative entries and enforces the size bound.
    ///
    /// This is the `cleanup` command; the same eviction also runs inline
    /// whenever a `put` pushes the cache over its cap.
    pub fn cleanup(&self) {
        let expired = {
            let mut index = self.index.lock().unwrap();
            let expired: Vec<CacheKey> = index
                .entries
                .iter()
                .filter(|(_, meta)| {
                    meta.negative_since.is_some_and(|since| {
                        since
                            .elapsed()
                            .map_or(true, |age| age > self.retry_misses_after)
                    })
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                index.remove(key);
            }
            expired
        };

        for key in &expired {
            self.remove_entry_file(&self.entry_path(key));
        }

        self.evict_if_needed();
        metric!(gauge("diskcache.usage") = self.total_bytes());
    }

    /// Removes an entry file and any directories it leaves empty.
    fn remove_entry_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "failed to remove cache entry",
                );
            }
        }

        // prune the version, debug id, debug file and shard directories when
        // they become empty
        let mut dir = path.parent();
        for _ in 0..4 {
            let Some(current) = dir else { break };
            if current == self.root || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    /// Rebuilds the in-memory index from the on-disk tree.
    ///
    /// Entries of other symcache format versions are deleted. Recency is
    /// seeded from file modification times, which is exact for negative
    /// entries and approximates last use for positive ones.
    fn warm_scan(&self) -> io::Result<()> {
        let mut found: Vec<(CacheKey, u64, SystemTime)> = Vec::new();

        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() || shard.file_name() == "tmp" {
                continue;
            }

            for debug_file in subdirectories(&shard.path())? {
                for debug_id in subdirectories(&debug_file.path())? {
                    for version in subdirectories(&debug_id.path())? {
                        let matches_version = version
                            .file_name()
                            .to_str()
                            .and_then(|name| name.parse::<u32>().ok())
                            == Some(SYMCACHE_VERSION);

                        if !matches_version {
                            tracing::debug!(
                                path = %version.path().display(),
                                "removing cache entry of other format version",
                            );
                            let _ = fs::remove_dir_all(version.path());
                            continue;
                        }

                        let path = version.path().join("symcache");
                        let Ok(metadata) = path.metadata() else {
                            continue;
                        };

                        let key = CacheKey::new(
                            &debug_file.file_name().to_string_lossy(),
                            &debug_id.file_name().to_string_lossy(),
                        );
                        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                        found.push((key, metadata.len(), mtime));
                    }
                }
            }
        }

        // seed the LRU order from mtimes
        found.sort_by_key(|(_, _, mtime)| *mtime);

        let mut index = self.index.lock().unwrap();
        for (key, size, mtime) in found {
            let negative_since = (size == 0).then_some(mtime);
            index.insert(key, size, negative_since);
        }

        tracing::info!(
            entries = index.entries.len(),
            total_bytes = index.total_bytes,
            "cache index rebuilt",
        );

        Ok(())
    }
}

/// A lease protecting one cache entry from eviction.
#[derive(Debug)]
pub struct CacheLease {
    cache: Arc<DiskCache>,
    key: CacheKey,
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if let Some(meta) = self.cache.index.lock().unwrap().entries.get_mut(&self.key) {
            meta.readers = meta.readers.saturating_sub(1);
        }
    }
}

/// The sub-directories of `path`, skipping stray files.
fn subdirectories(path: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry);
        }
    }
    Ok(dirs)
}
