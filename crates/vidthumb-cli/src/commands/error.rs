//! Error handling for subcommands.

use std::process::ExitCode;

use tracing::error;
use vidthumb_core::{Error, ErrorKind, ExtractError};

use crate::logging::LoggingError;

/// Anything that can make a subcommand fail.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Core library failure (configuration, cache, payload).
    #[error(transparent)]
    Core(#[from] Error),

    /// Frame extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Logging could not be set up.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// Writing to stdout failed.
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// Encoding JSON output failed.
    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Extraction failure kind, if this is one.
    #[must_use]
    pub const fn extract_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Extract(e) | Self::Core(Error::Extract(e)) => Some(e.kind()),
            _ => None,
        }
    }

    /// Process exit code: 2 for extraction failures, 1 for anything else.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.extract_kind().is_some() { 2 } else { 1 }
    }
}

/// Log a failed command and turn it into an exit status.
pub fn report(e: &CliError) -> ExitCode {
    match e.extract_kind() {
        Some(kind) => error!("Command failed [kind={}]: {}", kind, e),
        None => error!("Command failed: {}", e),
    }
    ExitCode::from(e.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_errors_exit_with_two() {
        let err = CliError::from(ExtractError::Timeout { timeout_ms: 10 });
        assert_eq!(err.extract_kind(), Some(ErrorKind::Timeout));
        assert_eq!(err.exit_code(), 2);

        let err = CliError::from(Error::from(ExtractError::Cancelled));
        assert_eq!(err.extract_kind(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = CliError::from(Error::configuration("bad"));
        assert_eq!(err.extract_kind(), None);
        assert_eq!(err.exit_code(), 1);
    }
}
