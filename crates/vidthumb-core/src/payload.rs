//! Self-describing image payloads.
//!
//! Thumbnails travel as `data:<mime>;base64,<payload>` strings so they can be
//! handed directly to an image surface without a separate content type.

use std::fmt;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::{Error, PayloadError, Result};

/// Mime type produced by the frame extractor.
pub const JPEG_MIME: &str = "image/jpeg";

/// Fallback mime type when a data URL does not declare one.
const DEFAULT_MIME: &str = JPEG_MIME;

/// An encoded image as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageData(String);

impl ImageData {
    /// Encode raw image bytes with the given mime type.
    #[must_use]
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    /// Parse and validate an existing data URL.
    pub fn parse(data_url: impl Into<String>) -> std::result::Result<Self, PayloadError> {
        let data_url = data_url.into();
        split_data_url(&data_url)?;
        Ok(Self(data_url))
    }

    /// The declared mime type.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        split_data_url(&self.0).map_or(DEFAULT_MIME, |(mime, _)| mime)
    }

    /// Whether the payload declares a JPEG image.
    #[must_use]
    pub fn is_jpeg(&self) -> bool {
        self.mime_type() == JPEG_MIME
    }

    /// Decode the base64 payload back to raw image bytes.
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, PayloadError> {
        let (_, encoded) = split_data_url(&self.0)?;
        BASE64
            .decode(encoded)
            .map_err(|e| PayloadError::Decode(e.to_string()))
    }

    /// Write the decoded image bytes to a file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| Error::file_system(path, e.to_string()))
    }

    /// Length of the data URL in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the data URL is empty. Never true for a parsed payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the data URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the payload, returning the data URL.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Split a data URL into `(mime, base64 payload)`.
fn split_data_url(data_url: &str) -> std::result::Result<(&str, &str), PayloadError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| PayloadError::InvalidDataUrl("missing data: scheme".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| PayloadError::InvalidDataUrl("missing payload separator".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| PayloadError::InvalidDataUrl("payload is not base64".to_string()))?;
    if payload.is_empty() {
        return Err(PayloadError::InvalidDataUrl("empty payload".to_string()));
    }
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
    Ok((mime, payload))
}

impl fmt::Display for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageData {
    type Error = PayloadError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ImageData> for String {
    fn from(value: ImageData) -> Self {
        value.0
    }
}

impl AsRef<str> for ImageData {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
