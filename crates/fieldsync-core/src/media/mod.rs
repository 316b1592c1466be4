//! Photo payload preparation
//!
//! Captures arrive as raw camera bytes. Before a photo hits the store it is
//! re-encoded into a bounded JPEG rendition; the untouched original rides
//! along only while it fits the per-photo ceiling, so one oversized capture
//! cannot crowd out a day of work. The same module owns the base64 framing
//! used when a photo payload travels inside the JSON sync contract.

use std::io::Cursor;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use image::{codecs::jpeg::JpegEncoder, GenericImageView};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Longest edge of the compressed rendition, in pixels.
pub const MAX_EDGE_PX: u32 = 1920;
/// JPEG quality of the compressed rendition.
pub const JPEG_QUALITY: u8 = 80;

/// A capture re-encoded for local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPhoto {
    /// Bounded JPEG rendition, always stored
    pub compressed: Vec<u8>,
    /// Source bytes, retained only when within the per-photo ceiling
    pub original: Option<Vec<u8>>,
    /// Pixel width of the compressed rendition
    pub width: u32,
    /// Pixel height of the compressed rendition
    pub height: u32,
}

/// Re-encode a capture into its stored form.
///
/// The source is decoded, scaled to fit [`MAX_EDGE_PX`] on its longest edge
/// (never upscaled), and encoded as JPEG at [`JPEG_QUALITY`]. Sources that
/// cannot be decoded are rejected rather than stored blind.
pub fn prepare_photo(source: &[u8], config: &EngineConfig) -> Result<PreparedPhoto> {
    if source.is_empty() {
        return Err(Error::Validation(
            "photo source bytes are empty".to_string(),
        ));
    }

    let decoded = image::load_from_memory(source)
        .map_err(|error| Error::Validation(format!("failed to decode photo: {error}")))?;

    let (source_width, source_height) = decoded.dimensions();
    let resized = if source_width <= MAX_EDGE_PX && source_height <= MAX_EDGE_PX {
        decoded
    } else {
        decoded.thumbnail(MAX_EDGE_PX, MAX_EDGE_PX)
    };
    let (width, height) = resized.dimensions();

    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY);
    encoder
        .encode_image(&resized)
        .map_err(|error| Error::Validation(format!("failed to encode photo: {error}")))?;
    let compressed = cursor.into_inner();

    let original = (source.len() as u64 <= config.max_photo_bytes()).then(|| source.to_vec());

    tracing::debug!(
        "Prepared photo: {} -> {} bytes at {width}x{height}, original {}",
        source.len(),
        compressed.len(),
        if original.is_some() {
            "retained"
        } else {
            "dropped"
        }
    );

    Ok(PreparedPhoto {
        compressed,
        original,
        width,
        height,
    })
}

/// Encode photo bytes for the JSON sync contract.
#[must_use]
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode photo bytes received over the JSON sync contract.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map_err(|error| Error::Validation(format!("invalid photo payload encoding: {error}")))
}
