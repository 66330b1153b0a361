//! Vidthumb - extract cover frames from streaming video and cache them.
//!
//! This is the command line entry point.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use commands::{AppState, CacheCommand, CliError, ExtractCommand, ThumbnailCommand};
use logging::LoggingConfig;

#[derive(Debug, Parser)]
#[command(
    name = "vidthumb",
    version,
    about = "Extract cover frames from streaming video and cache them",
    after_help = "EXAMPLES:\n  \
                  vidthumb extract https://cdn.example.com/v1/master.m3u8 --max-width 320\n  \
                  vidthumb extract clip.mp4 --seek 1 --native --output cover.jpg\n  \
                  vidthumb thumbnail v1 https://cdn.example.com/v1/master.m3u8\n  \
                  vidthumb cache stats"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file [default: platform config directory]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract one frame from a video
    Extract(ExtractCommand),

    /// Resolve a catalog video's thumbnail through the cache
    Thumbnail(ThumbnailCommand),

    /// Inspect or maintain the thumbnail cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(&LoggingConfig::cli(cli.verbose)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("vidthumb: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting vidthumb {}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => commands::report(&e),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let state = AppState::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract(cmd) => cmd.execute(&state).await,
        Commands::Thumbnail(cmd) => cmd.execute(&state).await,
        Commands::Cache { action } => action.execute(&state),
    }
}
