//! In-process fast path for thumbnail reads.
//!
//! Holds at most one payload per video id, never evicts on its own, and is
//! emptied when disposed. Each payload remembers the source URL it was
//! produced from; a lookup under a different URL drops the entry instead of
//! serving it.

use dashmap::DashMap;
use tracing::debug;

use crate::payload::ImageData;

#[derive(Debug, Clone)]
struct Entry {
    source_url: String,
    image: ImageData,
}

/// Unbounded per-process map from video id to thumbnail payload.
#[derive(Debug, Default)]
pub struct EphemeralMap {
    entries: DashMap<String, Entry>,
}

impl EphemeralMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the payload for a video, provided it came from `source_url`.
    ///
    /// An entry from another URL is removed and reported as a miss.
    pub fn get(&self, video_id: &str, source_url: &str) -> Option<ImageData> {
        {
            let entry = self.entries.get(video_id)?;
            if entry.source_url == source_url {
                return Some(entry.image.clone());
            }
        }

        self.entries
            .remove_if(video_id, |_, e| e.source_url != source_url);
        debug!("Dropped ephemeral thumbnail for {} (source changed)", video_id);
        None
    }

    /// Store a payload, replacing any previous one for the same id.
    pub fn insert(&self, video_id: &str, source_url: &str, image: ImageData) {
        self.entries.insert(
            video_id.to_string(),
            Entry {
                source_url: source_url.to_string(),
                image,
            },
        );
    }

    /// Remove the payload for a video id.
    pub fn remove(&self, video_id: &str) -> Option<ImageData> {
        self.entries.remove(video_id).map(|(_, e)| e.image)
    }

    /// Whether a payload exists for the id, whatever its source.
    #[must_use]
    pub fn contains(&self, video_id: &str) -> bool {
        self.entries.contains_key(video_id)
    }

    /// Number of cached payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Release all entries at the end of the map's lifetime.
    pub fn dispose(&self) {
        let released = self.entries.len();
        self.entries.clear();
        debug!("Disposed ephemeral thumbnail map ({} entries)", released);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::payload::JPEG_MIME;

    const URL_A: &str = "https://cdn.example.com/a/index.m3u8";
    const URL_B: &str = "https://cdn.example.com/b/index.m3u8";

    fn image(byte: u8) -> ImageData {
        ImageData::from_bytes(JPEG_MIME, &[byte])
    }

    #[test]
    fn test_insert_replaces_per_id() {
        let map = EphemeralMap::new();
        map.insert("v1", URL_A, image(1));
        map.insert("v1", URL_A, image(2));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("v1", URL_A), Some(image(2)));
    }

    #[test]
    fn test_other_source_is_a_miss_and_drops_entry() {
        let map = EphemeralMap::new();
        map.insert("v1", URL_A, image(1));

        assert_eq!(map.get("v1", URL_B), None);
        assert!(!map.contains("v1"));
        assert_eq!(map.get("v1", URL_A), None);
    }

    #[test]
    fn test_remove_and_contains() {
        let map = EphemeralMap::new();
        map.insert("v1", URL_A, image(1));
        assert!(map.contains("v1"));

        assert_eq!(map.remove("v1"), Some(image(1)));
        assert!(!map.contains("v1"));
        assert_eq!(map.remove("v1"), None);
    }

    #[test]
    fn test_instances_are_isolated() {
        let first = EphemeralMap::new();
        let second = EphemeralMap::new();
        first.insert("v1", URL_A, image(1));

        assert!(second.get("v1", URL_A).is_none());
    }

    #[test]
    fn test_dispose_clears() {
        let map = EphemeralMap::new();
        map.insert("v1", URL_A, image(1));
        map.insert("v2", URL_A, image(2));

        map.dispose();
        assert!(map.is_empty());
    }
}
