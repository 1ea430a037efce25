//! Single-flight coordination of symcache computation.
//!
//! Concurrent requests for the same module coalesce onto one computation: the
//! first caller spawns a detached task that consults the disk cache and, on a
//! miss, downloads, parses and compiles the sym file, then publishes the
//! result. Later callers await the same shared channel. Because the task is
//! detached, a caller abandoning the wait (request deadline) does not cancel
//! the computation, its result still lands in the disk cache.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{oneshot, Semaphore};

use crate::download::DownloadService;
use crate::symcache::SymCache;
use crate::symfile;
use crate::types::ModuleRef;

use super::{CacheContents, CacheError, CacheKey, CacheLease, DiskCache, GetOutcome};

type ComputationChannel = Shared<BoxFuture<'static, CacheContents<Arc<SymCache>>>>;

/// The per-module result of [`SymCacheProvider::fetch`].
///
/// The lease, when present, protects the underlying cache entry from eviction
/// and should be held for as long as the symcache is used.
#[derive(Debug)]
pub struct FetchedSymCache {
    pub contents: CacheContents<Arc<SymCache>>,
    pub lease: Option<CacheLease>,
}

/// Produces symcaches for modules, deduplicating concurrent work per key.
pub struct SymCacheProvider {
    cache: Arc<DiskCache>,
    downloader: Arc<DownloadService>,

    /// Process-wide bound on concurrent symcache builds.
    build_permits: Arc<Semaphore>,

    /// Currently running computations, keyed by cache key.
    ///
    /// Each channel is fulfilled exactly once; entries are removed right
    /// before fulfillment, when the result is already published to disk.
    computations: Mutex<HashMap<CacheKey, ComputationChannel>>,
}

impl std::fmt::Debug for SymCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let computations = self
            .computations
            .try_lock()
            .map(|c| c.len())
            .unwrap_or_default();
        f.debug_struct("SymCacheProvider")
            .field("cache", &self.cache)
            .field("running computations", &computations)
            .finish()
    }
}

impl SymCacheProvider {
    pub fn new(
        cache: Arc<DiskCache>,
        downloader: Arc<DownloadService>,
        max_concurrent_builds: usize,
    ) -> Arc<Self> {
        Arc::new(SymCacheProvider {
            cache,
            downloader,
            build_permits: Arc::new(Semaphore::new(max_concurrent_builds)),
            computations: Mutex::new(HashMap::new()),
        })
    }

    /// Obtains the symcache for `module`, from disk or by building it.
    pub async fn fetch(self: &Arc<Self>, module: &ModuleRef) -> FetchedSymCache {
        let key = CacheKey::for_module(module);

        let channel = {
            let mut computations = self.computations.lock().unwrap();
            match computations.get(&key) {
                Some(channel) => channel.clone(),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let channel: ComputationChannel = async move {
                        rx.await.unwrap_or(Err(CacheError::InternalError))
                    }
                    .boxed()
                    .shared();
                    computations.insert(key.clone(), channel.clone());

                    let this = Arc::clone(self);
                    let task_key = key.clone();
                    let module = module.clone();
                    tokio::spawn(async move {
                        let result = this.compute(&task_key, &module).await;
                        // remove before sending: by now the result is on disk,
                        // so late arrivals can go through the cache again
                        this.computations.lock().unwrap().remove(&task_key);
                        let _ = tx.send(result);
                    });

                    channel
                }
            }
        };

        let contents = channel.await;
        let lease = contents.is_ok().then(|| self.cache.pin(&key));

        FetchedSymCache { contents, lease }
    }

    async fn compute(&self, key: &CacheKey, module: &ModuleRef) -> CacheContents<Arc<SymCache>> {
        match self.cache.get(key).await {
            GetOutcome::Hit(data) => {
                let loaded = tokio::task::spawn_blocking(move || SymCache::parse(&data))
                    .await
                    .map_err(CacheError::from_std_error)?;

                match loaded {
                    Ok(symcache) => return Ok(Arc::new(symcache)),
                    Err(e) => {
                        // treat an unreadable blob as a cold miss and rebuild
                        tracing::warn!(%key, error = %e, "discarding unreadable symcache");
                        self.cache.remove(key);
                    }
                }
            }
            GetOutcome::Negative => return Err(CacheError::NotFound),
            GetOutcome::Miss => {}
        }

        let _permit = self
            .build_permits
            .acquire()
            .await
            .expect("build semaphore closed");

        let data = match self.downloader.download(module).await {
            Ok(data) => data,
            Err(CacheError::NotFound) => {
                if let Err(e) = self.cache.put_negative(key) {
                    tracing::error!(
                        %key,
                        error = &e as &dyn std::error::Error,
                        "failed to write negative cache entry",
                    );
                }
                return Err(CacheError::NotFound);
            }
            // transient errors are not cached
            Err(e) => return Err(e),
        };

        let module_for_build = module.clone();
        let built = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let parsed = symfile::parse(&module_for_build.debug_id, Cursor::new(&data));
            metric!(timer("symbolicate.parse_sym_file.parse") = start.elapsed());

            parsed.map(|sym| {
                let symcache = SymCache::build(&module_for_build, sym);
                let blob = symcache.to_bytes();
                (symcache, blob)
            })
        })
        .await
        .map_err(CacheError::from_std_error)?;

        match built {
            Ok((symcache, blob)) => {
                if let Err(e) = self.cache.put(key, &blob) {
                    tracing::error!(
                        %key,
                        error = &e as &dyn std::error::Error,
                        "failed to write symcache to cache",
                    );
                }
                Ok(Arc::new(symcache))
            }
            Err(error) => {
                tracing::warn!(%key, error = %error, "failed to parse sym file");
                metric!(
                    counter("symbolicate.parse_sym_file.error") += 1,
                    "reason" => error.reason(),
                );

                // a mismatched debug id is permanent, remember it as missing;
                // everything else is retried on the next request
                if error.reason() == "bad_debug_id" {
                    let _ = self.cache.put_negative(key);
                }

                Err(CacheError::Malformed(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;

    use crate::config::{Config, DiskCacheConfig, DownloaderConfig};

    const DEBUG_ID: &str = "44E4EC8C2F41492B9369D6B9A059577C2";

    const SYM_FILE: &str = "MODULE windows x86_64 44E4EC8C2F41492B9369D6B9A059577C2 xul.pdb\n\
                            FILE 7 src/foo.cpp\n\
                            FUNC 1200 100 0 foo\n\
                            1234 8 42 7\n";

    /// A symbol server counting how often the sym file was downloaded.
    fn counting_symbol_server(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let downloads = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route(
                "/{debug_file}/{debug_id}/{sym_file}",
                get(move |State(downloads): State<Arc<AtomicUsize>>| async move {
                    downloads.fetch_add(1, Ordering::SeqCst);
                    body
                }),
            )
            .with_state(downloads.clone());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum_server::from_tcp(listener).serve(app.into_make_service()));

        (format!("http://{addr}/"), downloads)
    }

    fn provider(cache_dir: &Path, sources: Vec<String>) -> Arc<SymCacheProvider> {
        let config = Config {
            cache_dir: cache_dir.to_owned(),
            sources,
            cache: DiskCacheConfig {
                retry_misses_after: Duration::from_secs(3600),
                ..DiskCacheConfig::default()
            },
            downloader: DownloaderConfig {
                timeout: Duration::from_secs(2),
                connect_timeout: Duration::from_secs(1),
                max_download_timeout: Duration::from_secs(5),
                retries: 0,
            },
            ..Config::default()
        };

        let cache = DiskCache::new(&config).unwrap();
        let downloader = Arc::new(DownloadService::new(&config));
        SymCacheProvider::new(cache, downloader, config.max_concurrent_builds)
    }

    fn module() -> ModuleRef {
        ModuleRef::new("xul.pdb", DEBUG_ID).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_builds_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (url, downloads) = counting_symbol_server(SYM_FILE);
        let provider = provider(dir.path(), vec![url]);

        let fetched = provider.fetch(&module()).await;
        let symcache = fetched.contents.unwrap();
        assert_eq!(symcache.lookup(0x1234)[0].function, "foo");
        assert!(fetched.lease.is_some());

        // a second fetch is served from disk
        let fetched = provider.fetch(&module()).await;
        assert!(fetched.contents.is_ok());
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let (url, downloads) = counting_symbol_server(SYM_FILE);
        let provider = provider(dir.path(), vec![url]);

        let fetches = (0..8).map(|_| {
            let provider = provider.clone();
            async move { provider.fetch(&module()).await }
        });
        let results = futures::future::join_all(fetches).await;

        for fetched in &results {
            assert!(fetched.contents.is_ok());
        }
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_module_is_cached_negatively() {
        let dir = tempfile::tempdir().unwrap();
        let (url, downloads) = {
            // a server that knows no files at all
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let downloads = Arc::new(AtomicUsize::new(0));
            let app = Router::new().fallback({
                let downloads = downloads.clone();
                move || {
                    downloads.fetch_add(1, Ordering::SeqCst);
                    async { axum::http::StatusCode::NOT_FOUND }
                }
            });
            tokio::spawn(axum_server::from_tcp(listener).serve(app.into_make_service()));
            (format!("http://{addr}/"), downloads)
        };
        let provider = provider(dir.path(), vec![url]);

        let fetched = provider.fetch(&module()).await;
        assert_eq!(fetched.contents.unwrap_err(), CacheError::NotFound);

        // the negative entry suppresses further downloads
        let fetched = provider.fetch(&module()).await;
        assert_eq!(fetched.contents.unwrap_err(), CacheError::NotFound);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_debug_id_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let other_id = "MODULE windows x86_64 FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF xul.pdb\n";
        let (url, downloads) = counting_symbol_server(other_id);
        let provider = provider(dir.path(), vec![url]);

        let fetched = provider.fetch(&module()).await;
        assert!(matches!(
            fetched.contents.unwrap_err(),
            CacheError::Malformed(_)
        ));

        // remembered as missing, no second download
        let fetched = provider.fetch(&module()).await;
        assert_eq!(fetched.contents.unwrap_err(), CacheError::NotFound);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_sym_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let malformed = "MODULE windows x86_64 44E4EC8C2F41492B9369D6B9A059577C2 xul.pdb\n\
                         FUNC nothex 100 0 foo\n";
        let (url, downloads) = counting_symbol_server(malformed);
        let provider = provider(dir.path(), vec![url]);

        let fetched = provider.fetch(&module()).await;
        assert!(matches!(
            fetched.contents.unwrap_err(),
            CacheError::Malformed(_)
        ));

        // not cached, the next request downloads again
        let fetched = provider.fetch(&module()).await;
        assert!(matches!(
            fetched.contents.unwrap_err(),
            CacheError::Malformed(_)
        ));
        assert_eq!(downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let (url, downloads) = counting_symbol_server(SYM_FILE);
        let provider = provider(dir.path(), vec![url]);

        provider.fetch(&module()).await.contents.unwrap();
        assert_eq!(downloads.load(Ordering::SeqCst), 1);

        // corrupt the published blob on disk
        let key = CacheKey::for_module(&module());
        let path = dir
            .path()
            .join(key.cache_path(crate::symcache::SYMCACHE_VERSION));
        std::fs::write(&path, b"garbage").unwrap();

        // the corrupt blob is treated as a cold miss and rebuilt
        let fetched = provider.fetch(&module()).await;
        assert!(fetched.contents.is_ok());
        assert_eq!(downloads.load(Ordering::SeqCst), 2);
    }
}
