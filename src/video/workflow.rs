//! Submit → poll → download, stopping at the first failing stage.

use crate::config::VeoConfig;
use crate::error::{Result, Stage, WorkflowError};
use crate::video::client::JobClient;
use crate::video::fetch::{default_output_path, unix_timestamp, Fetcher};
use crate::video::poll::Poller;
use crate::video::types::{DownloadResult, OperationHandle, VideoGenerationRequest};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One configured generation pipeline.
pub struct VideoWorkflow {
    client: JobClient,
    poller: Poller,
    fetcher: Fetcher,
    base_url: String,
}

impl VideoWorkflow {
    /// Builds the job client, poller and fetcher from one config.
    pub fn new(config: &VeoConfig) -> Result<Self> {
        Ok(Self {
            client: JobClient::new(config)?,
            poller: Poller::new(config.poll.clone()),
            fetcher: Fetcher::new(config)?,
            base_url: config.base_url.clone(),
        })
    }

    /// Job client used for submission and status queries.
    pub fn client(&self) -> &JobClient {
        &self.client
    }

    /// Fetcher used for downloads.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Wraps an existing operation name as a handle for this workflow's API.
    pub fn handle(&self, operation_name: impl Into<String>) -> OperationHandle {
        OperationHandle::new(operation_name, &self.base_url)
    }

    /// Runs the whole pipeline for `request`.
    ///
    /// Without `output`, the file goes to [`default_output_path`] for the
    /// request prompt.
    pub async fn run(
        &self,
        request: &VideoGenerationRequest,
        output: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> std::result::Result<DownloadResult, WorkflowError> {
        let output =
            output.unwrap_or_else(|| default_output_path(&request.prompt, unix_timestamp()));
        let started_at = Instant::now();

        tracing::info!(prompt = %request.prompt, "generating video");
        let handle = self
            .client
            .submit(request)
            .await
            .map_err(WorkflowError::at(Stage::Submit))?;
        tracing::info!(operation = %handle, "video generation started");

        self.finish(&handle, started_at, &output, cancel).await
    }

    /// Polls an already-submitted operation and downloads its result.
    ///
    /// The deadline is measured from the call.
    pub async fn resume(
        &self,
        handle: &OperationHandle,
        output: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<DownloadResult, WorkflowError> {
        self.finish(handle, Instant::now(), output, cancel).await
    }

    async fn finish(
        &self,
        handle: &OperationHandle,
        started_at: Instant,
        output: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<DownloadResult, WorkflowError> {
        let uri = self
            .poller
            .wait(&self.client, handle, started_at, cancel)
            .await
            .map_err(WorkflowError::at(Stage::Poll))?;

        self.fetcher
            .download(&uri, output, cancel)
            .await
            .map_err(WorkflowError::at(Stage::Download))
    }
}
