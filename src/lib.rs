#![warn(missing_docs)]
//! veoflow - long-running Veo video generation through an API proxy.
//!
//! A run submits a generation request, polls the returned operation with
//! backoff until it finishes, then downloads the video.
//!
//! # Quick Start
//!
//! ```no_run
//! use veoflow::{encode_image, ReferenceImage, VeoConfig, VideoGenerationRequest, VideoWorkflow};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VeoConfig::builder().build()?;
//!     let workflow = VideoWorkflow::new(&config)?;
//!
//!     let request = VideoGenerationRequest::new("Ocean waves at sunset")
//!         .with_aspect_ratio("16:9")
//!         .with_reference_image(ReferenceImage::new(encode_image("ref/shore.jpg")?));
//!
//!     let video = workflow
//!         .run(&request, Some("waves.mp4".into()), &CancellationToken::new())
//!         .await?;
//!     println!("saved {} ({} bytes)", video.path.display(), video.size_bytes);
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! [`VeoConfig::builder`] falls back to `LITELLM_BASE_URL`, `LITELLM_API_KEY`
//! and `VEO_MODEL`, then to compiled-in defaults.

pub mod config;
mod error;
pub mod image;
pub mod video;

pub use config::{DownloadRoute, PollPolicy, VeoConfig, VeoConfigBuilder};
pub use error::{ProviderErrorDetail, Result, Stage, VeoFlowError, WorkflowError};
pub use image::{decode_base64, decode_to_file, encode_image, EncodedImage, ImageFormat};
pub use video::{
    DownloadResult, GenerationParameters, OperationHandle, OperationStatus, ReferenceImage,
    VideoGenerationRequest, VideoWorkflow,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::VeoConfig;
    pub use crate::error::{Result, Stage, VeoFlowError, WorkflowError};
    pub use crate::image::encode_image;
    pub use crate::video::{ReferenceImage, VideoGenerationRequest, VideoWorkflow};
}
