//! Logging setup for the `vidthumb` binary.
//!
//! Stdout is reserved for command output (data URLs and JSON), so console
//! logs go to stderr. A JSON copy of the log is kept on disk for later
//! inspection of failed extractions.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Targets logged at the configured level. Everything else is held at
/// `warn` on the console and `info` in the file.
const OWN_TARGETS: [&str; 2] = ["vidthumb", "vidthumb_core"];

/// Rolling JSON log file.
#[derive(Debug, Clone)]
pub struct FileSink {
    pub directory: PathBuf,
    pub prefix: String,
    pub level: Level,
    pub rotation: Rotation,
    /// Rotated files kept on disk.
    pub max_files: usize,
}

impl FileSink {
    /// Daily files under the platform data directory, one week retained.
    #[must_use]
    pub fn daily() -> Self {
        Self {
            directory: default_log_directory(),
            prefix: "vidthumb".to_string(),
            level: Level::DEBUG,
            rotation: Rotation::DAILY,
            max_files: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub console_level: Level,
    /// Add source locations, targets and span timings to console lines.
    pub detailed_console: bool,
    pub file: Option<FileSink>,
}

impl LoggingConfig {
    /// Settings for one CLI invocation.
    ///
    /// `--verbose` raises the console to `debug`. Debug builds also print
    /// source locations and log span timings.
    #[must_use]
    pub fn cli(verbose: bool) -> Self {
        Self {
            console_level: if verbose { Level::DEBUG } else { Level::INFO },
            detailed_console: cfg!(debug_assertions),
            file: Some(FileSink::daily()),
        }
    }
}

/// Flushes the file log when dropped. Hold it until `main` returns.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    // RUST_LOG, when set, replaces the console filter entirely.
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => target_filter(Level::WARN, config.console_level)?,
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.detailed_console)
        .with_file(config.detailed_console)
        .with_line_number(config.detailed_console)
        .with_span_events(if config.detailed_console {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_filter(console_filter);

    let (file, guard) = match &config.file {
        Some(sink) => {
            std::fs::create_dir_all(&sink.directory).map_err(|e| {
                LoggingError::DirectoryCreationFailed {
                    path: sink.directory.clone(),
                    reason: e.to_string(),
                }
            })?;

            let appender = RollingFileAppender::builder()
                .rotation(sink.rotation.clone())
                .filename_prefix(&sink.prefix)
                .max_log_files(sink.max_files)
                .build(&sink.directory)
                .map_err(|e| LoggingError::AppenderFailed(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_filter(target_filter(Level::INFO, sink.level)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

/// `others` for dependencies, `own` for this workspace's crates.
fn target_filter(others: Level, own: Level) -> Result<EnvFilter, LoggingError> {
    let own = own.as_str().to_ascii_lowercase();
    let mut filter = EnvFilter::new(others.as_str().to_ascii_lowercase());
    for target in OWN_TARGETS {
        filter = filter.add_directive(directive(&format!("{target}={own}"))?);
    }
    Ok(filter)
}

fn directive(text: &str) -> Result<Directive, LoggingError> {
    text.parse()
        .map_err(|_| LoggingError::InvalidDirective(text.to_string()))
}

#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidthumb")
        .join("logs")
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    #[error("Failed to open log file: {0}")]
    AppenderFailed(String),

    #[error("Invalid log filter directive: {0}")]
    InvalidDirective(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
