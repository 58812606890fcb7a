//! Video generation: submit, poll, fetch.

pub mod client;
pub mod fetch;
pub mod poll;
mod types;
pub mod workflow;

pub use client::{JobClient, OperationSource};
pub use fetch::{default_output_path, rewrite_uri, verify_download, Fetcher};
pub use poll::{parse_operation, Backoff, Poller};
pub use types::{
    DownloadResult, GenerationParameters, OperationHandle, OperationStatus, ReferenceImage,
    VideoGenerationRequest,
};
pub use workflow::VideoWorkflow;
