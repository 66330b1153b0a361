//! Subcommands of the `vidthumb` binary.
//!
//! This module is organized into submodules by feature area:
//! - `state`: Configuration and service construction
//! - `error`: Error type and exit codes
//! - `extract`: One-off frame extraction
//! - `thumbnail`: Cached thumbnail resolution for a catalog video
//! - `cache`: Cache inspection and maintenance

mod cache;
mod error;
mod extract;
mod state;
mod thumbnail;

pub use cache::CacheCommand;
pub use error::{CliError, report};
pub use extract::ExtractCommand;
pub use state::AppState;
pub use thumbnail::ThumbnailCommand;

use std::io::Write;

use serde::Serialize;

/// Write `value` to stdout as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Write a line to stdout.
fn print_line(line: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    Ok(())
}
