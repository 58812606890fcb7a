//! Core types for video generation.

use crate::error::ProviderErrorDetail;
use crate::image::EncodedImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A reference image guiding the generated video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    /// Encoded image payload.
    pub image: EncodedImage,
    /// Provider reference type (e.g. "asset", "style"). Omitted when `None`.
    pub reference_type: Option<String>,
}

impl ReferenceImage {
    /// Creates a reference image with the provider's default reference type.
    pub fn new(image: EncodedImage) -> Self {
        Self {
            image,
            reference_type: None,
        }
    }

    /// Sets the reference type.
    pub fn with_reference_type(mut self, kind: impl Into<String>) -> Self {
        self.reference_type = Some(kind.into());
        self
    }
}

/// Optional generation knobs. Unset values use the provider defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    /// Aspect ratio (e.g., "16:9", "9:16").
    pub aspect_ratio: Option<String>,
    /// Compression quality (e.g., "optimized", "lossless").
    pub compression_quality: Option<String>,
    /// Desired video duration in seconds.
    pub duration_secs: Option<u32>,
    /// Let the provider rewrite the prompt.
    pub enhance_prompt: Option<bool>,
    /// Generate an audio track.
    pub generate_audio: Option<bool>,
    /// What to avoid in the video.
    pub negative_prompt: Option<String>,
    /// Person generation policy (e.g., "allow_adult").
    pub person_generation: Option<String>,
    /// Resize mode for image-to-video (e.g., "pad", "crop").
    pub resize_mode: Option<String>,
    /// Resolution (e.g., "720p", "1080p").
    pub resolution: Option<String>,
    /// Number of videos to generate.
    pub sample_count: Option<u32>,
    /// Seed for deterministic generation.
    pub seed: Option<u32>,
    /// Cloud storage URI to write results to.
    pub storage_uri: Option<String>,
}

impl GenerationParameters {
    /// Returns true when no knob is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A request to generate a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenerationRequest {
    /// The text prompt describing the desired video.
    pub prompt: String,
    /// Image used as the first frame (image-to-video).
    pub first_frame: Option<EncodedImage>,
    /// Ordered reference images.
    pub reference_images: Vec<ReferenceImage>,
    /// Generation parameters.
    pub parameters: GenerationParameters,
}

impl VideoGenerationRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            first_frame: None,
            reference_images: Vec::new(),
            parameters: GenerationParameters::default(),
        }
    }

    /// Appends a reference image.
    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_images.push(image);
        self
    }

    /// Sets the first frame.
    pub fn with_first_frame(mut self, image: EncodedImage) -> Self {
        self.first_frame = Some(image);
        self
    }

    /// Replaces all generation parameters.
    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.parameters.aspect_ratio = Some(ratio.into());
        self
    }

    /// Sets the desired video duration in seconds.
    pub fn with_duration(mut self, secs: u32) -> Self {
        self.parameters.duration_secs = Some(secs);
        self
    }

    /// Sets the resolution.
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.parameters.resolution = Some(resolution.into());
        self
    }

    /// Sets the negative prompt.
    pub fn with_negative_prompt(mut self, text: impl Into<String>) -> Self {
        self.parameters.negative_prompt = Some(text.into());
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.parameters.seed = Some(seed);
        self
    }
}

/// Opaque handle of a long-running operation.
///
/// A handle remembers the API base URL that issued it and can only be polled
/// there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    name: String,
    base_url: String,
}

impl OperationHandle {
    /// Wraps an operation name issued by the API at `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Operation name as returned by the provider.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL that issued this handle.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the status resource.
    pub fn poll_url(&self) -> String {
        format!("{}/{}", self.base_url, self.name.trim_start_matches('/'))
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Status of an operation after one query.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    /// Still running.
    Pending,
    /// Finished with the artifact URI.
    Done(String),
    /// Finished with a provider error.
    Failed(ProviderErrorDetail),
}

impl OperationStatus {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A downloaded video on local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    /// Where the file was written.
    pub path: PathBuf,
    /// Size of the written file.
    pub size_bytes: u64,
}

impl DownloadResult {
    /// Size in mebibytes, for display.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}
