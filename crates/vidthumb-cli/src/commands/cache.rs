//! Cache management commands.

use clap::Subcommand;
use tracing::{debug, info};

use super::error::CliError;
use super::state::AppState;
use super::{print_json, print_line};

/// Inspect or maintain the thumbnail cache.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print cache statistics as JSON
    Stats,
    /// Remove one video's thumbnail from both tiers
    Evict {
        /// Catalog video id
        id: String,
    },
    /// Remove every cached thumbnail
    Clear,
    /// Print the durable cache directory
    Path,
}

impl CacheCommand {
    /// Run the command against the configured cache.
    pub fn execute(self, state: &AppState) -> Result<(), CliError> {
        let cache = state.cache()?;

        match self {
            Self::Stats => {
                debug!("Getting cache statistics");
                print_json(&cache.stats())
            }
            Self::Evict { id } => {
                cache.evict(&id);
                info!("Evicted cached thumbnail for {}", id);
                Ok(())
            }
            Self::Clear => {
                info!("Clearing all cached thumbnails");
                print_json(&cache.clear_all())
            }
            Self::Path => print_line(&cache.config().resolved_store_dir().display().to_string()),
        }
    }
}
