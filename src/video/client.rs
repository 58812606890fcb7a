//! Job client: creates Veo operations and reads their status.

use crate::config::VeoConfig;
use crate::error::{
    header_pairs, parse_retry_after, sanitize_error_message, Result, VeoFlowError,
};
use crate::image::EncodedImage;
use crate::video::types::{OperationHandle, VideoGenerationRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the static API key on every call.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

/// Something that can report the raw status of an operation.
///
/// The Poller only depends on this seam, so its state machine can be driven
/// without HTTP.
#[async_trait]
pub trait OperationSource: Send + Sync {
    /// Fetches the current operation resource as JSON.
    async fn fetch_operation(&self, handle: &OperationHandle) -> Result<Value>;

    /// Base URL whose handles this source can query.
    fn base_url(&self) -> &str;
}

/// Issues creation calls and status queries against the configured API.
pub struct JobClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    submit_url: String,
}

impl JobClient {
    /// Creates a client from the workflow configuration.
    pub fn new(config: &VeoConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            submit_url: config.submit_url(),
        })
    }

    /// Submits a generation request and returns the operation handle.
    pub async fn submit(&self, request: &VideoGenerationRequest) -> Result<OperationHandle> {
        let body = VeoRequest::from_request(request);
        tracing::debug!(
            url = %self.submit_url,
            reference_images = request.reference_images.len(),
            "submitting video generation request"
        );

        let response = self
            .client
            .post(&self.submit_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let text = response.text().await?;
        let operation: VeoOperationResponse = serde_json::from_str(&text).map_err(|e| {
            VeoFlowError::MalformedResponse(format!(
                "creation response is not an operation ({e}): {}",
                sanitize_error_message(&text)
            ))
        })?;

        match operation.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => Ok(OperationHandle::new(name, &self.base_url)),
            None => Err(VeoFlowError::MalformedResponse(format!(
                "no operation name returned: {}",
                sanitize_error_message(&text)
            ))),
        }
    }
}

#[async_trait]
impl OperationSource for JobClient {
    async fn fetch_operation(&self, handle: &OperationHandle) -> Result<Value> {
        let response = self
            .client
            .get(handle.poll_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        Ok(response.json().await?)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Maps a non-success response to an error.
pub(crate) fn parse_error(
    status: u16,
    text: &str,
    headers: &reqwest::header::HeaderMap,
) -> VeoFlowError {
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return VeoFlowError::RateLimited { retry_after };
    }

    // Prefer the message of a `{"error": {...}}` body over the raw text.
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|m| sanitize_error_message(&m))
        .unwrap_or_else(|| sanitize_error_message(text));

    if status == 401 || status == 403 {
        return VeoFlowError::Auth(message);
    }
    VeoFlowError::Api {
        status,
        message,
        headers: header_pairs(headers),
    }
}

// ── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoRequest {
    instances: Vec<VeoInstance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<VeoParameters>,
}

/// Flat media payload (`bytesBase64Encoded` + `mimeType`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoMediaData {
    bytes_base64_encoded: String,
    mime_type: String,
}

impl From<&EncodedImage> for VeoMediaData {
    fn from(image: &EncodedImage) -> Self {
        Self {
            bytes_base64_encoded: image.data.clone(),
            mime_type: image.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoReferenceImage {
    image: VeoMediaData,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VeoMediaData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reference_images: Vec<VeoReferenceImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enhance_prompt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    person_generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resize_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_uri: Option<String>,
}

impl VeoRequest {
    fn from_request(req: &VideoGenerationRequest) -> Self {
        let p = &req.parameters;
        let parameters = if p.is_empty() {
            None
        } else {
            Some(VeoParameters {
                aspect_ratio: p.aspect_ratio.clone(),
                compression_quality: p.compression_quality.clone(),
                duration_seconds: p.duration_secs,
                enhance_prompt: p.enhance_prompt,
                generate_audio: p.generate_audio,
                negative_prompt: p.negative_prompt.clone(),
                person_generation: p.person_generation.clone(),
                resize_mode: p.resize_mode.clone(),
                resolution: p.resolution.clone(),
                sample_count: p.sample_count,
                seed: p.seed,
                storage_uri: p.storage_uri.clone(),
            })
        };

        Self {
            instances: vec![VeoInstance {
                prompt: req.prompt.clone(),
                image: req.first_frame.as_ref().map(VeoMediaData::from),
                reference_images: req
                    .reference_images
                    .iter()
                    .map(|r| VeoReferenceImage {
                        image: VeoMediaData::from(&r.image),
                        reference_type: r.reference_type.clone(),
                    })
                    .collect(),
            }],
            parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VeoOperationResponse {
    #[serde(default)]
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::ReferenceImage;

    fn test_config(base_url: &str) -> VeoConfig {
        VeoConfig::builder()
            .base_url(base_url)
            .api_key("test-key")
            .model("veo-3.1-generate-preview")
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_construction_basic() {
        let req = VideoGenerationRequest::new("Ocean waves");
        let json = serde_json::to_value(VeoRequest::from_request(&req)).unwrap();

        assert_eq!(json["instances"][0]["prompt"], "Ocean waves");
        assert!(json.get("parameters").is_none());
        assert!(json["instances"][0].get("referenceImages").is_none());
        assert!(json["instances"][0].get("image").is_none());
    }

    #[test]
    fn test_request_serialization_uses_camel_case() {
        let req = VideoGenerationRequest::new("test")
            .with_aspect_ratio("16:9")
            .with_duration(8)
            .with_negative_prompt("blurry")
            .with_seed(12345);
        let json = serde_json::to_value(VeoRequest::from_request(&req)).unwrap();

        let params = &json["parameters"];
        assert_eq!(params["aspectRatio"], "16:9");
        assert_eq!(params["durationSeconds"], 8);
        assert_eq!(params["negativePrompt"], "blurry");
        assert_eq!(params["seed"], 12345);
        assert!(params.get("resolution").is_none());
    }

    #[test]
    fn test_reference_images_in_instance() {
        let req = VideoGenerationRequest::new("Anchor speaking")
            .with_reference_image(ReferenceImage::new(EncodedImage::new("AQID", "image/jpeg")))
            .with_reference_image(
                ReferenceImage::new(EncodedImage::new("BAUG", "image/png"))
                    .with_reference_type("asset"),
            );
        let json = serde_json::to_value(VeoRequest::from_request(&req)).unwrap();

        let refs = json["instances"][0]["referenceImages"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0]["image"]["bytesBase64Encoded"], "AQID");
        assert_eq!(refs[0]["image"]["mimeType"], "image/jpeg");
        assert!(refs[0].get("referenceType").is_none());
        assert_eq!(refs[1]["referenceType"], "asset");
    }

    #[test]
    fn test_parse_error_variants() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(matches!(
            parse_error(403, "forbidden", &headers),
            VeoFlowError::Auth(_)
        ));

        let body = r#"{"error": {"code": 400, "message": "Invalid prompt"}}"#;
        match parse_error(400, body, &headers) {
            VeoFlowError::Api { status, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid prompt");
            }
            other => panic!("Expected Api error, got: {other:?}"),
        }

        let mut limited = reqwest::header::HeaderMap::new();
        limited.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(
            parse_error(429, "", &limited).retry_after(),
            Some(std::time::Duration::from_secs(7))
        );
    }

    #[tokio::test]
    async fn test_submit_returns_handle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/veo-3.1-generate-preview:predictLongRunning")
            .match_header("x-goog-api-key", "test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "instances": [{"prompt": "Ocean waves"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "models/veo-3.1-generate-preview/operations/op1"}"#)
            .create_async()
            .await;

        let base_url = format!("{}/v1beta", server.url());
        let client = JobClient::new(&test_config(&base_url)).unwrap();
        let handle = client
            .submit(&VideoGenerationRequest::new("Ocean waves"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(handle.name(), "models/veo-3.1-generate-preview/operations/op1");
        assert_eq!(handle.base_url(), base_url);
    }

    #[tokio::test]
    async fn test_submit_without_name_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/veo-3.1-generate-preview:predictLongRunning")
            .with_status(200)
            .with_body(r#"{"metadata": {}}"#)
            .create_async()
            .await;

        let client = JobClient::new(&test_config(&format!("{}/v1beta", server.url()))).unwrap();
        let err = client
            .submit(&VideoGenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, VeoFlowError::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_submit_http_error_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/veo-3.1-generate-preview:predictLongRunning")
            .with_status(500)
            .with_body(r#"{"error": {"message": "upstream exploded"}}"#)
            .create_async()
            .await;

        let client = JobClient::new(&test_config(&format!("{}/v1beta", server.url()))).unwrap();
        let err = client
            .submit(&VideoGenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_fetch_operation_reads_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1beta/operations/op1")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_body(r#"{"name": "operations/op1", "done": false}"#)
            .create_async()
            .await;

        let base_url = format!("{}/v1beta", server.url());
        let client = JobClient::new(&test_config(&base_url)).unwrap();
        let handle = OperationHandle::new("operations/op1", &base_url);
        let value = client.fetch_operation(&handle).await.unwrap();
        assert_eq!(value["done"], false);
    }
}
