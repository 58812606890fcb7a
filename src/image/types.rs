//! Core image types.

use serde::{Deserialize, Serialize};

/// Image formats accepted as reference or first-frame images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG format (lossy).
    Jpeg,
    /// PNG format (lossless).
    Png,
    /// GIF format.
    Gif,
    /// Windows bitmap.
    Bmp,
    /// WebP format (modern, efficient).
    WebP,
    /// SVG vector image.
    Svg,
    /// Windows icon.
    Ico,
}

impl ImageFormat {
    /// Returns the canonical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::WebP => "webp",
            Self::Svg => "svg",
            Self::Ico => "ico",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::WebP => "image/webp",
            Self::Svg => "image/svg+xml",
            Self::Ico => "image/x-icon",
        }
    }

    /// Attempts to detect format from a file extension (with or without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "webp" => Some(Self::WebP),
            "svg" => Some(Self::Svg),
            "ico" => Some(Self::Ico),
            _ => None,
        }
    }
}

/// Base64 image payload ready to embed in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Standard base64 (padded) of the file bytes.
    pub data: String,
    /// MIME type matching the source extension.
    pub mime_type: String,
}

impl EncodedImage {
    /// Creates an encoded image from existing base64 data.
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}
