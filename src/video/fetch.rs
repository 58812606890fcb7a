//! Fetcher: resolves artifact URIs and streams them to disk.

use crate::config::{DownloadRoute, VeoConfig};
use crate::error::{header_pairs, sanitize_error_message, Result, VeoFlowError};
use crate::video::client::API_KEY_HEADER;
use crate::video::types::DownloadResult;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Size of the buffered writes to the output file.
pub const CHUNK_SIZE: usize = 8192;

const MEGABYTE: u64 = 1024 * 1024;
const MAX_REDIRECTS: usize = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Translates an artifact URI into the URL to download from.
pub fn rewrite_uri(uri: &str, base_url: &str, route: &DownloadRoute) -> String {
    let DownloadRoute::Proxy {
        upstream_prefix,
        api_segment,
        download_segment,
    } = route
    else {
        return uri.to_string();
    };

    let relative = match uri.strip_prefix(upstream_prefix.as_str()) {
        Some(rest) => rest,
        None if is_absolute(uri) => return uri.to_string(),
        None => uri,
    };

    let base_url = base_url.trim_end_matches('/');
    let download_base = match base_url.strip_suffix(api_segment.as_str()) {
        Some(root) if !api_segment.is_empty() => format!("{root}{download_segment}"),
        _ => base_url.to_string(),
    };

    format!("{}/{}", download_base, relative.trim_start_matches('/'))
}

fn is_absolute(uri: &str) -> bool {
    uri.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// Default output location for a prompt: `result/veo_video_<slug>_<unix>.mp4`.
pub fn default_output_path(prompt: &str, timestamp: u64) -> PathBuf {
    let safe: String = prompt
        .chars()
        .take(30)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let slug = safe.trim_end().replace(' ', "_");
    PathBuf::from("result").join(format!("veo_video_{slug}_{timestamp}.mp4"))
}

/// Seconds since the Unix epoch, for [`default_output_path`].
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Downloads generated videos.
pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    route: DownloadRoute,
}

impl Fetcher {
    /// Creates a fetcher from the workflow configuration.
    ///
    /// The download client has no overall timeout since video files can be
    /// large. Connecting and each read are bounded instead; redirects are
    /// followed.
    pub fn new(config: &VeoConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            route: config.download_route.clone(),
        })
    }

    /// URL the given artifact URI will be fetched from.
    pub fn download_url(&self, uri: &str) -> String {
        rewrite_uri(uri, &self.base_url, &self.route)
    }

    /// Streams the artifact to `target` and verifies the result.
    ///
    /// A failed or cancelled transfer removes the partial file.
    pub async fn download(
        &self,
        uri: &str,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadResult> {
        let url = self.download_url(uri);
        tracing::info!(original = %uri, url = %url, "downloading video");

        let request = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send();
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VeoFlowError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(VeoFlowError::Api {
                status: status.as_u16(),
                message: format!("download failed: {}", sanitize_error_message(&text)),
                headers: header_pairs(&headers),
            });
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = write_body(&mut response, target, cancel).await {
            remove_partial(target).await;
            return Err(e);
        }

        let result = verify_download(target)?;
        tracing::info!(
            path = %result.path.display(),
            size_mb = result.size_mb(),
            "video downloaded"
        );
        Ok(result)
    }
}

/// Checks that `path` exists and is non-empty; removes an empty file.
pub fn verify_download(path: &Path) -> Result<DownloadResult> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("output file was not created: {}", path.display()),
        )
    })?;

    if metadata.len() == 0 {
        std::fs::remove_file(path)?;
        return Err(VeoFlowError::EmptyDownload(path.to_path_buf()));
    }

    Ok(DownloadResult {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
    })
}

/// Writes the response body to `target`, flushed and synced to disk.
async fn write_body(
    response: &mut reqwest::Response,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    let file = tokio::fs::File::create(target).await?;
    let mut writer = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut downloaded: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(path = %target.display(), "download cancelled");
                return Err(VeoFlowError::Cancelled);
            }
            chunk = response.chunk() => chunk?,
        };
        let Some(chunk) = chunk else { break };

        writer.write_all(&chunk).await?;

        let before = downloaded;
        downloaded += chunk.len() as u64;
        if crossed_megabyte(before, downloaded) {
            tracing::info!(
                downloaded_mb = downloaded as f64 / MEGABYTE as f64,
                "download progress"
            );
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(downloaded)
}

/// True when growing from `before` to `after` bytes passes a whole MiB.
fn crossed_megabyte(before: u64, after: u64) -> bool {
    after / MEGABYTE > before / MEGABYTE
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), "could not remove partial download: {e}");
    }
}
