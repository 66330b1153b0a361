//! One-off frame extraction.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};
use vidthumb_core::{CancellationToken, ExtractOptions};

use super::error::CliError;
use super::state::AppState;
use super::print_line;

/// Extract a single frame and print it as a data URL.
#[derive(Debug, Args)]
pub struct ExtractCommand {
    /// Video source URL (HLS manifest or plain video file)
    pub url: String,

    /// Position of the frame in seconds [default: configured seek time]
    #[arg(long)]
    pub seek: Option<f64>,

    /// Give up after this many milliseconds
    #[arg(long, default_value_t = ExtractOptions::default().timeout_ms)]
    pub timeout_ms: u64,

    /// JPEG quality between 0 and 1
    #[arg(long, default_value_t = ExtractOptions::default().quality)]
    pub quality: f32,

    /// Maximum width of the image in pixels
    #[arg(long, conflicts_with = "native")]
    pub max_width: Option<u32>,

    /// Keep the native frame width
    #[arg(long)]
    pub native: bool,

    /// Write the decoded JPEG to this file instead of printing the data URL
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ExtractCommand {
    /// Extraction options from the command line flags.
    #[must_use]
    pub fn options(&self) -> ExtractOptions {
        let max_width = if self.native {
            None
        } else {
            self.max_width.or(ExtractOptions::default().max_width)
        };

        ExtractOptions::default()
            .with_timeout_ms(self.timeout_ms)
            .with_quality(self.quality)
            .with_max_width(max_width)
    }

    /// Run the extraction. Ctrl-C cancels it.
    pub async fn execute(self, state: &AppState) -> Result<(), CliError> {
        let options = self.options();
        let seek = self.seek.unwrap_or(state.config.seek_time_secs);
        let extractor = state.extractor();

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling extraction");
                    cancel.cancel();
                }
            })
        };

        let result = extractor
            .extract_with_cancel(&self.url, seek, &options, cancel)
            .await;
        interrupt.abort();
        let image = result?;

        match &self.output {
            Some(path) => {
                image.write_to(path)?;
                info!("Wrote {} to {}", image.mime_type(), path.display());
            }
            None => print_line(image.as_str())?,
        }
        Ok(())
    }
}
