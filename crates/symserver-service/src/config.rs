use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use sentry::types::Dsn;
use serde::Deserialize;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other).
    Auto,
    /// With colors.
    Pretty,
    /// Simplified log output.
    Simplified,
    /// Dump out JSON lines.
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::Info,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of the statsd instance.
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname under, for each metric. Defaults to not sending
    /// such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        let statsd = match (env::var("STATSD_HOST"), env::var("STATSD_PORT")) {
            (Ok(host), Ok(port)) => Some(format!("{host}:{port}")),
            (Ok(host), Err(_)) => Some(format!("{host}:8125")),
            _ => None,
        };

        Metrics {
            statsd,
            prefix: "symserver".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of the on-disk symcache cache.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DiskCacheConfig {
    /// Upper bound (high-water mark) for the total size of cached entries, in bytes.
    pub max_size_bytes: u64,

    /// Eviction target (low-water mark), in bytes.
    ///
    /// When unset, eviction drains the cache to 90% of `max_size_bytes`.
    pub low_water_bytes: Option<u64>,

    /// Time after which a negative ("known missing upstream") entry expires and the
    /// module is looked up again.
    #[serde(with = "humantime_serde")]
    pub retry_misses_after: Duration,

    /// Whether to rebuild the in-memory index from the cache directory on startup.
    pub warm_scan: bool,
}

impl DiskCacheConfig {
    pub fn low_water_bytes(&self) -> u64 {
        self.low_water_bytes
            .unwrap_or(self.max_size_bytes / 10 * 9)
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        DiskCacheConfig {
            max_size_bytes: env_parse("DISKCACHE_MAX_BYTES").unwrap_or(20 * 1024 * 1024 * 1024),
            low_water_bytes: None,
            retry_misses_after: Duration::from_secs(3600 * 24),
            warm_scan: true,
        }
    }
}

/// Timeouts and retry behavior of the sym file downloader.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DownloaderConfig {
    /// The timeout for a single download attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// The timeout for establishing a connection to a source.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The wall-clock budget for downloading one module, across all sources and
    /// retries.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// How often a failed attempt against a single source is retried.
    pub retries: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            timeout: env_parse("DOWNLOADER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(5),
            max_download_timeout: Duration::from_secs(120),
            retries: env_parse("DOWNLOADER_RETRIES").unwrap_or(3),
        }
    }
}

/// See docs/index.md for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Which directory to use for the on-disk symcache cache.
    pub cache_dir: PathBuf,

    /// Ordered list of symbol source URL prefixes to try for `.sym` files.
    pub sources: Vec<String>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to.
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune the disk cache.
    pub cache: DiskCacheConfig,

    /// Fine-tune the downloader.
    pub downloader: DownloaderConfig,

    /// Maximum number of jobs accepted in a single v5 request.
    pub max_jobs: usize,

    /// Wall-clock deadline for a symbolication request.
    ///
    /// Modules whose symcache is not available when the deadline expires are
    /// reported as not found; their downloads and builds keep running in the
    /// background and land in the cache for the next request.
    #[serde(with = "humantime_serde")]
    pub request_deadline: Duration,

    /// How many module fetches a single request may run concurrently.
    pub max_concurrent_fetches: usize,

    /// How many symcache builds (download + parse + compile) the whole process
    /// may run concurrently.
    pub max_concurrent_builds: usize,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse YAML")
    }
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:8050".to_owned()
    } else {
        "127.0.0.1:8050".to_owned()
    }
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> PathBuf {
    if let Some(root) = env::var_os("DISKCACHE_ROOT") {
        return PathBuf::from(root);
    }

    if is_docker() {
        // Docker image already defines `/data` as a persistent volume
        PathBuf::from("/data")
    } else {
        env::temp_dir().join("symserver-cache")
    }
}

/// Default value for the "sources" configuration.
fn default_sources() -> Vec<String> {
    match env::var("SYMBOL_URLS") {
        Ok(urls) => urls
            .split(',')
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty())
            .collect(),
        Err(_) => vec!["https://symbols.mozilla.org/".to_owned()],
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok()?.parse().ok()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            cache_dir: default_cache_dir(),
            sources: default_sources(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            cache: DiskCacheConfig::default(),
            downloader: DownloaderConfig::default(),
            max_jobs: env_parse("SYMBOLICATE_MAX_JOBS").unwrap_or(10),
            request_deadline: env_parse("SYMBOLICATE_REQUEST_DEADLINE_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(60)),
            max_concurrent_fetches: 16,
            max_concurrent_builds: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_cache_config() {
        // It should be possible to set individual cache values in reasonable units
        // without affecting other defaults.
        let yaml = r#"
            cache:
              retry_misses_after: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.retry_misses_after, Duration::from_secs(3600));
        assert_eq!(
            cfg.cache.max_size_bytes,
            DiskCacheConfig::default().max_size_bytes
        );
    }

    #[test]
    fn test_low_water_defaults_to_ninety_percent() {
        let yaml = r#"
            cache:
              max_size_bytes: 1000
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.low_water_bytes(), 900);

        let yaml = r#"
            cache:
              max_size_bytes: 1000
              low_water_bytes: 500
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.low_water_bytes(), 500);
    }

    #[test]
    fn test_downloader_timeouts() {
        let yaml = r#"
            downloader:
              timeout: 2s
              retries: 1
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.downloader.timeout, Duration::from_secs(2));
        assert_eq!(cfg.downloader.retries, 1);
        assert_eq!(
            cfg.downloader.max_download_timeout,
            DownloaderConfig::default().max_download_timeout
        );
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_cache:
                max_unused_for: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
