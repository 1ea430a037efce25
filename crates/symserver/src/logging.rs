use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use symserver_service::config::{Config, LogFormat};

/// The default `RUST_LOG` filter for a configured level.
///
/// The service's own crates follow the configured level. The HTTP client
/// internals used by the downloader stay capped at WARN, they are far too
/// chatty when tracing sym file fetches.
fn default_rust_log(level: log::LevelFilter) -> &'static str {
    match level {
        log::LevelFilter::Off => "",
        log::LevelFilter::Error => "ERROR",
        log::LevelFilter::Warn => "WARN",
        log::LevelFilter::Info => "INFO,hyper=WARN,reqwest=WARN",
        log::LevelFilter::Debug => {
            "INFO,\
             hyper=WARN,\
             reqwest=WARN,\
             symserver=DEBUG,\
             symserver_service=DEBUG"
        }
        log::LevelFilter::Trace => {
            "INFO,\
             hyper=WARN,\
             reqwest=WARN,\
             symserver=TRACE,\
             symserver_service=TRACE"
        }
    }
}

/// Initializes logging for the symserver.
///
/// `RUST_LOG` wins when set; otherwise the filter is derived from the
/// configured level via [`default_rust_log`]. `RUST_BACKTRACE` is toggled by
/// the `enable_backtraces` config value. The `auto` format resolves to pretty
/// output on a tty and simplified output everywhere else.
pub fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        env::set_var("RUST_BACKTRACE", "1");
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", default_rust_log(config.logging.level));
    }

    let format = match config.logging.format {
        LogFormat::Auto if console::user_attended() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    };

    let builder = FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env());

    match format {
        LogFormat::Pretty | LogFormat::Auto => tracing::subscriber::set_global_default(
            builder.pretty().finish().with(sentry::integrations::tracing::layer()),
        ),
        LogFormat::Simplified => tracing::subscriber::set_global_default(
            builder.compact().finish().with(sentry::integrations::tracing::layer()),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            builder.json().finish().with(sentry::integrations::tracing::layer()),
        ),
    }
    .expect("setting global default subscriber");
}

/// Logs an error through the configured logger, or `stderr` when error events
/// are filtered out or logging never came up.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!("{error:?}");
    } else {
        eprintln!("{error:?}");
    }
}
