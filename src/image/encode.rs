//! Conversion between local image files and base64 payloads.

use crate::error::{Result, VeoFlowError};
use crate::image::types::{EncodedImage, ImageFormat};
use base64::Engine;
use std::path::Path;

/// Reads an image file and encodes it as base64.
///
/// Fails with [`VeoFlowError::FileNotFound`] when the path does not exist and
/// with [`VeoFlowError::UnsupportedFormat`] when the extension is not a known
/// image type.
pub fn encode_image(path: impl AsRef<Path>) -> Result<EncodedImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(VeoFlowError::FileNotFound(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format = ImageFormat::from_extension(ext)
        .ok_or_else(|| VeoFlowError::UnsupportedFormat(format!(".{}", ext.to_lowercase())))?;

    let bytes = std::fs::read(path)?;
    tracing::debug!(
        path = %path.display(),
        size_bytes = bytes.len(),
        mime = format.mime_type(),
        "encoded image"
    );

    Ok(EncodedImage::new(
        base64::engine::general_purpose::STANDARD.encode(&bytes),
        format.mime_type(),
    ))
}

/// Decodes base64 (optionally a `data:` URL) and writes the bytes to `path`.
///
/// Parent directories are created as needed.
pub fn decode_to_file(data: &str, path: impl AsRef<Path>) -> Result<()> {
    let bytes = decode_base64(data)?;
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Decodes base64 text, stripping a `data:<mime>;base64,` header if present.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = if data.starts_with("data:") {
        data.split_once(',')
            .map(|(_, rest)| rest)
            .ok_or_else(|| VeoFlowError::Decode("data URL without a ',' separator".into()))?
    } else {
        data
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| VeoFlowError::Decode(format!("invalid base64: {e}")))
}
