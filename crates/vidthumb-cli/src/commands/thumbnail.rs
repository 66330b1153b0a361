//! Thumbnail resolution for a catalog video.

use clap::Args;
use serde::Serialize;
use tracing::info;
use vidthumb_core::VideoRecord;

use super::error::CliError;
use super::print_json;
use super::state::AppState;

/// Resolve a video's thumbnail through the cache, extracting on a miss.
#[derive(Debug, Args)]
pub struct ThumbnailCommand {
    /// Catalog video id
    pub id: String,

    /// Video source URL
    pub url: String,

    /// Thumbnail already stored in the catalog, returned as-is
    #[arg(long)]
    pub stored: Option<String>,
}

#[derive(Debug, Serialize)]
struct ThumbnailOutput<'a> {
    id: &'a str,
    origin: &'static str,
    thumbnail: &'a str,
}

impl ThumbnailCommand {
    /// The catalog record this command describes.
    #[must_use]
    pub fn record(&self) -> VideoRecord {
        let record = VideoRecord::new(&self.id, &self.url);
        match &self.stored {
            Some(stored) => record.with_stored_thumbnail(stored),
            None => record,
        }
    }

    /// Resolve and print the thumbnail.
    pub async fn execute(self, state: &AppState) -> Result<(), CliError> {
        let orchestrator = state.orchestrator()?;
        let thumbnail = orchestrator.get_thumbnail(&self.record()).await?;
        info!("Resolved {} thumbnail for {}", thumbnail.origin(), self.id);

        print_json(&ThumbnailOutput {
            id: &self.id,
            origin: thumbnail.origin(),
            thumbnail: thumbnail.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_with_stored_thumbnail() {
        let command = ThumbnailCommand {
            id: "v1".to_string(),
            url: "https://cdn/v1.m3u8".to_string(),
            stored: Some("https://img/v1.jpg".to_string()),
        };

        let record = command.record();
        assert_eq!(record.id, "v1");
        assert_eq!(record.stored_thumbnail.as_deref(), Some("https://img/v1.jpg"));
    }
}
