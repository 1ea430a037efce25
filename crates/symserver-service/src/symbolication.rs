//! Request-scoped symbolication.
//!
//! A request carries one or more jobs; each job names a memory map and stacks
//! of `(module_index, module_offset)` frames. The orchestrator collects the
//! distinct modules referenced by any frame, obtains their symcaches in
//! parallel through the single-flight cache, and assembles the response in the
//! exact input order. Module failures never fail the request, the affected
//! frames simply stay unsymbolicated.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::caching::{CacheError, DiskCache, FetchedSymCache, SymCacheProvider};
use crate::config::Config;
use crate::download::DownloadService;
use crate::symcache::SourceLocation;
use crate::types::{
    FrameInfo, FrameRequest, InlineFrameInfo, JobResult, ModuleRef, SymbolicationJob,
};

#[derive(Debug)]
pub struct SymbolicationService {
    provider: Arc<SymCacheProvider>,
    request_deadline: Duration,
    max_concurrent_fetches: usize,
}

impl SymbolicationService {
    /// Creates the service, opening the disk cache below `config.cache_dir`.
    pub fn create(config: &Config) -> io::Result<Self> {
        let cache = DiskCache::new(config)?;
        let downloader = Arc::new(DownloadService::new(config));
        let provider = SymCacheProvider::new(cache, downloader, config.max_concurrent_builds);

        Ok(SymbolicationService {
            provider,
            request_deadline: config.request_deadline,
            max_concurrent_fetches: config.max_concurrent_fetches,
        })
    }

    /// Symbolicates all jobs of one request.
    ///
    /// The result vector parallels `jobs`; within each job, stack and frame
    /// order are preserved exactly.
    pub async fn symbolicate(
        &self,
        jobs: &[SymbolicationJob],
        api_version: &'static str,
    ) -> Vec<JobResult> {
        let modules = referenced_modules(jobs);
        let fetched = self.fetch_modules(modules).await;

        let mut total_frames = 0usize;
        let results = jobs
            .iter()
            .map(|job| {
                metric!(
                    histogram("symbolicate.stacks_count") = job.stacks.len() as u64,
                    "version" => api_version,
                );

                let stacks: Vec<Vec<FrameInfo>> = job
                    .stacks
                    .iter()
                    .map(|stack| {
                        total_frames += stack.len();
                        stack
                            .iter()
                            .enumerate()
                            .map(|(frame_index, frame)| {
                                symbolicate_frame(job, frame_index, frame, &fetched)
                            })
                            .collect()
                    })
                    .collect();

                let found_modules = job
                    .memory_map
                    .iter()
                    .map(|(debug_file, debug_id)| {
                        let found = ModuleRef::new(debug_file, debug_id)
                            .and_then(|module| fetched.get(&module))
                            .map(|result| result.contents.is_ok());
                        (format!("{debug_file}/{debug_id}"), found)
                    })
                    .collect();

                JobResult {
                    stacks,
                    found_modules,
                }
            })
            .collect();

        metric!(histogram("symbolicate.frames_count") = total_frames as u64);

        results
    }

    /// Fetches symcaches for all modules concurrently.
    ///
    /// Fetches are bounded by the per-request concurrency limit and by the
    /// request deadline. A module that misses the deadline is reported as a
    /// timeout here while its build keeps running detached, so the work still
    /// lands in the cache.
    async fn fetch_modules(
        &self,
        modules: BTreeSet<ModuleRef>,
    ) -> HashMap<ModuleRef, FetchedSymCache> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let deadline = Instant::now() + self.request_deadline;

        let fetches = modules.into_iter().map(|module| {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("fetch semaphore closed");

                let remaining = deadline.saturating_duration_since(Instant::now());
                let fetched = match tokio::time::timeout(remaining, provider.fetch(&module)).await
                {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        tracing::debug!(%module, "request deadline hit while fetching symcache");
                        FetchedSymCache {
                            contents: Err(CacheError::Timeout(remaining)),
                            lease: None,
                        }
                    }
                };

                (module, fetched)
            }
        });

        future::join_all(fetches).await.into_iter().collect()
    }
}

/// The distinct modules referenced by at least one frame.
///
/// Duplicate memory-map entries collapse here; modules that no frame points at
/// are never fetched and report as `null` in `found_modules`.
fn referenced_modules(jobs: &[SymbolicationJob]) -> BTreeSet<ModuleRef> {
    let mut modules = BTreeSet::new();
    for job in jobs {
        for stack in &job.stacks {
            for frame in stack {
                if let Some((debug_file, debug_id)) = job.module_for(frame) {
                    if let Some(module) = ModuleRef::new(debug_file, debug_id) {
                        modules.insert(module);
                    }
                }
            }
        }
    }
    modules
}

fn symbolicate_frame(
    job: &SymbolicationJob,
    frame_index: usize,
    frame: &FrameRequest,
    fetched: &HashMap<ModuleRef, FetchedSymCache>,
) -> FrameInfo {
    let raw_module = job.module_for(frame);

    let module_name = match raw_module {
        Some((debug_file, _)) if !debug_file.is_empty() => debug_file.clone(),
        _ => "<unknown>".to_owned(),
    };
    let mut info = FrameInfo::unresolved(frame_index, module_name, frame.module_offset);

    let symcache = raw_module
        .and_then(|(debug_file, debug_id)| ModuleRef::new(debug_file, debug_id))
        .and_then(|module| fetched.get(&module))
        .and_then(|result| result.contents.as_ref().ok());

    let Some(symcache) = symcache else {
        return info;
    };

    info.module = symcache.module_name().to_owned();

    let locations = symcache.lookup(frame.module_offset);
    let Some((outer, inlines)) = locations.split_last() else {
        // address not covered by the module's symbols, leave the raw frame
        return info;
    };

    info.function = Some(outer.function.clone());
    info.function_offset = Some(format!("{:#x}", frame.module_offset - outer.sym_addr));
    info.file = outer.file.clone();
    // a line without a file does not mean anything
    info.line = outer.file.is_some().then_some(outer.line).flatten();

    if !inlines.is_empty() {
        let inlines = inlines
            .iter()
            .map(|location: &SourceLocation| InlineFrameInfo {
                function: location.function.clone(),
                file: location.file.clone(),
                line: location.file.is_some().then_some(location.line).flatten(),
            })
            .collect();
        info.inlines = Some(inlines);
    }

    info
}
