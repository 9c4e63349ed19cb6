//! fal.ai inference client.
//!
//! A job runs in three phases: the sketch is uploaded to fal storage, a
//! request is submitted to the model's queue, and its status is polled until
//! the result can be fetched. The whole submit/poll/fetch sequence is bounded
//! by the configured inference timeout.

use crate::config::InferenceConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to read staged file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Inference job {request_id} did not complete within {timeout:?}")]
    Timeout { request_id: String, timeout: Duration },

    #[error("Inference did not complete within {0:?}")]
    SubmitTimeout(Duration),
}

/// Remote image-to-3D inference operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Upload a local file so the inference service can fetch it. Returns the
    /// remote URL.
    async fn upload_asset(&self, path: &Path) -> Result<String, InferenceError>;

    /// Run `endpoint` with `arguments` and wait for its JSON result.
    async fn run(&self, endpoint: &str, arguments: Value) -> Result<Value, InferenceError>;
}

/// Reference to the generated mesh inside an inference result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshReference {
    pub url: String,
    /// Format tag, e.g. "glb"
    pub format: String,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MeshOutput {
    model_mesh: Option<MeshFile>,
}

#[derive(Debug, Deserialize)]
struct MeshFile {
    url: Option<String>,
    content_type: Option<String>,
    file_name: Option<String>,
    file_size: Option<u64>,
}

impl MeshReference {
    /// Extract `model_mesh.url` from an inference result.
    ///
    /// Returns `None` when the mesh or its URL is absent; callers treat that
    /// as a broken upstream contract.
    pub fn from_result(result: &Value, requested_format: &str) -> Option<Self> {
        let output = MeshOutput::deserialize(result).ok()?;
        let mesh = output.model_mesh?;
        let url = mesh.url.filter(|u| !u.is_empty())?;

        Some(Self {
            url,
            format: requested_format.to_string(),
            content_type: mesh.content_type,
            file_name: mesh.file_name,
            file_size: mesh.file_size,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadInitiateResponse {
    upload_url: String,
    file_url: String,
}

#[derive(Debug, Deserialize)]
struct QueueSubmission {
    request_id: String,
    status_url: Option<String>,
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
    queue_position: Option<u64>,
}

/// fal.ai client using the queue API
pub struct FalClient {
    http_client: reqwest::Client,
    api_key: String,
    queue_url: String,
    rest_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl FalClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            queue_url: config.queue_url.trim_end_matches('/').to_string(),
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.api_key)
    }

    /// Turn a non-success response into an `Upstream` error
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(InferenceError::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    async fn submit(&self, endpoint: &str, arguments: &Value) -> Result<QueueSubmission, InferenceError> {
        let url = format!("{}/{}", self.queue_url, endpoint);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(arguments)
            .send()
            .await?;

        Ok(Self::check_status(response).await?.json().await?)
    }

    async fn poll_until_complete(
        &self,
        endpoint: &str,
        submission: &QueueSubmission,
    ) -> Result<Value, InferenceError> {
        let status_url = submission.status_url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/requests/{}/status",
                self.queue_url, endpoint, submission.request_id
            )
        });
        let response_url = submission.response_url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/requests/{}",
                self.queue_url, endpoint, submission.request_id
            )
        });

        loop {
            let response = self
                .http_client
                .get(&status_url)
                .header("Authorization", self.auth_header())
                .send()
                .await?;

            let status: QueueStatus = Self::check_status(response).await?.json().await?;

            match status.status.as_str() {
                "COMPLETED" => break,
                other => {
                    debug!(
                        request_id = %submission.request_id,
                        status = %other,
                        queue_position = ?status.queue_position,
                        "Inference job pending"
                    );
                    sleep(self.poll_interval).await;
                }
            }
        }

        // Failed jobs surface here as a non-success response
        let response = self
            .http_client
            .get(&response_url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        Ok(Self::check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl InferenceClient for FalClient {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn upload_asset(&self, path: &Path) -> Result<String, InferenceError> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.png")
            .to_string();
        let content_type = content_type_for(path);

        let response = self
            .http_client
            .post(format!(
                "{}/storage/upload/initiate?storage_type=fal-cdn-v3",
                self.rest_url
            ))
            .header("Authorization", self.auth_header())
            .json(&json!({
                "content_type": content_type,
                "file_name": file_name,
            }))
            .send()
            .await?;

        let initiated: UploadInitiateResponse = Self::check_status(response).await?.json().await?;

        let size = data.len();
        let response = self
            .http_client
            .put(&initiated.upload_url)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await?;
        Self::check_status(response).await?;

        info!(size_bytes = size, file_url = %initiated.file_url, "Asset uploaded to fal storage");

        Ok(initiated.file_url)
    }

    #[instrument(skip(self, arguments))]
    async fn run(&self, endpoint: &str, arguments: Value) -> Result<Value, InferenceError> {
        let start = Instant::now();

        let submission = tokio::time::timeout(self.timeout, self.submit(endpoint, &arguments))
            .await
            .map_err(|_| InferenceError::SubmitTimeout(self.timeout))??;

        info!(request_id = %submission.request_id, "Inference job submitted");

        let remaining = self.timeout.saturating_sub(start.elapsed());
        let result = tokio::time::timeout(remaining, self.poll_until_complete(endpoint, &submission))
            .await
            .map_err(|_| InferenceError::Timeout {
                request_id: submission.request_id.clone(),
                timeout: self.timeout,
            })??;

        info!(
            request_id = %submission.request_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Inference job completed"
        );

        Ok(result)
    }
}

/// Content type for a staged sketch, from its extension
fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match extension.as_deref() {
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
