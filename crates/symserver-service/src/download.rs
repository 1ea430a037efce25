//! Fetches `.sym` files over HTTP from an ordered list of symbol sources.
//!
//! Sources are tried in order. A 404 advances to the next source; server
//! errors, connection failures and timeouts are retried against the same
//! source with jittered exponential backoff before advancing. Compressed
//! variants are handled through HTTP content encoding, the client transparently
//! decodes them.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::caching::{CacheContents, CacheError};
use crate::config::{Config, DownloaderConfig};
use crate::types::ModuleRef;

/// HTTP User-Agent string to use.
const USER_AGENT: &str = concat!("symserver/", env!("CARGO_PKG_VERSION"));

/// Base delay before the first retry.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// A service downloading symbol files from the configured sources.
#[derive(Debug)]
pub struct DownloadService {
    client: reqwest::Client,
    sources: Vec<String>,
    config: DownloaderConfig,
}

impl DownloadService {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.downloader.connect_timeout)
            .gzip(true)
            .build()
            .expect("failed to construct HTTP client");

        DownloadService {
            client,
            sources: config.sources.clone(),
            config: config.downloader.clone(),
        }
    }

    /// The URL of the sym file for `module` on the source with the given prefix.
    fn sym_url(&self, prefix: &str, module: &ModuleRef) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix.trim_end_matches('/'),
            module.debug_file,
            module.debug_id,
            module.sym_filename()
        )
    }

    /// Downloads the sym file for `module`, trying each source in order.
    ///
    /// Returns the decoded body on success, [`CacheError::NotFound`] when all
    /// sources report the file missing, or the last transient error once all
    /// sources have exhausted their retries.
    pub async fn download(&self, module: &ModuleRef) -> CacheContents<Vec<u8>> {
        let start = Instant::now();
        let deadline = start + self.config.max_download_timeout;
        let mut last_error = None;

        let result = async {
            for source in &self.sources {
                let url = self.sym_url(source, module);
                match self.download_with_retries(&url, deadline).await {
                    Ok(data) => return Ok(data),
                    Err(CacheError::NotFound) => continue,
                    Err(error) => {
                        tracing::debug!(url, error = %error, "sym file download failed");
                        last_error = Some(error);
                    }
                }
            }

            Err(last_error.unwrap_or(CacheError::NotFound))
        }
        .await;

        metric!(
            timer("downloader.download") = start.elapsed(),
            "response" => if result.is_ok() { "success" } else { "fail" },
        );

        result
    }

    async fn download_with_retries(
        &self,
        url: &str,
        deadline: Instant,
    ) -> CacheContents<Vec<u8>> {
        let mut backoff = RETRY_BACKOFF_BASE;

        for attempt in 0..=self.config.retries {
            let result = self.download_once(url, deadline).await;

            let should_retry = matches!(
                result,
                Err(CacheError::DownloadError(_) | CacheError::Timeout(_))
            );
            if !should_retry || attempt == self.config.retries {
                return result;
            }

            // exponential backoff with +-25% jitter
            let jitter = rand::rng().random_range(0.75..=1.25);
            tokio::time::sleep(backoff.mul_f64(jitter)).await;
            backoff *= 2;
        }

        unreachable!("the retry loop always returns");
    }

    async fn download_once(&self, url: &str, deadline: Instant) -> CacheContents<Vec<u8>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = self.config.timeout.min(remaining);
        if timeout.is_zero() {
            return Err(CacheError::Timeout(self.config.max_download_timeout));
        }

        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status.is_success() {
                tracing::trace!(url, "sym file fetched");
                return Ok(response.bytes().await?.to_vec());
            }

            if status.is_client_error() {
                // chances are it's a 404, in any case there is nothing to
                // retry here
                tracing::trace!(url, %status, "sym file not available");
                return Err(CacheError::NotFound);
            }

            tracing::debug!(url, %status, "unexpected status code");
            Err(CacheError::DownloadError(status.to_string()))
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        if error.status() == Some(StatusCode::NOT_FOUND) {
            return Self::NotFound;
        }

        let mut source: &dyn std::error::Error = &error;
        while let Some(inner) = source.source() {
            source = inner;
        }

        Self::DownloadError(source.to_string())
    }
}
