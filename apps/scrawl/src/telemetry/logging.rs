use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Overrides the level-derived filter with a full directive string.
pub const FILTER_ENV: &str = "SCRAWL_LOG_FILTER";

const OWN_CRATES: &[&str] = &["scrawl", "scrawl_client_core", "tile_hub"];
const CHATTY_CRATES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2", "mio"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("cannot open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("a global subscriber is already installed: {0}")]
    Install(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Only the first successful call has effect.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = std::env::var(FILTER_ENV)
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(directives(config.level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level == LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

/// Default directives: our crates follow `level`; at debug and trace the rest
/// of the process stays at info, and the HTTP stack is capped there too.
pub(crate) fn directives(level: LogLevel) -> String {
    if level < LogLevel::Debug {
        return LevelFilter::from(level).to_string().to_lowercase();
    }
    let ours = LevelFilter::from(level).to_string().to_lowercase();
    let mut parts = vec!["info".to_owned()];
    parts.extend(OWN_CRATES.iter().map(|name| format!("{name}={ours}")));
    if level == LogLevel::Trace {
        parts.extend(CHATTY_CRATES.iter().map(|name| format!("{name}=info")));
    }
    parts.join(",")
}
