//! HTTP clients for the remote services: AI analysis, embeddings and
//! thumbnail upload.
//!
//! Each client is only built when its endpoint is configured; a missing
//! endpoint leaves the matching flow step unconfigured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rk_core::config::RemoteConfig;
use rk_core::RecordId;
use rk_pipeline::collaborators::{
    AiAnalyzer, EmbeddingService, FocalLengthDetector, ThumbnailSelector, ThumbnailUploader,
};
use rk_pipeline::{MetadataMap, Session};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Build the shared HTTP client with the configured request timeout.
pub fn http_client(config: &RemoteConfig) -> rk_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("reelkeeper/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| rk_core::Error::remote("http", e))
}

/// Send `request` and decode a JSON response, mapping failures to
/// [`rk_core::Error::Remote`] for `service`.
async fn send_json<T: DeserializeOwned>(
    service: &str,
    request: reqwest::RequestBuilder,
) -> rk_core::Result<T> {
    let resp = request
        .send()
        .await
        .map_err(|e| rk_core::Error::remote(service, format!("request failed: {e}")))?;

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(rk_core::Error::Unauthorized(format!("{service} returned {status}")));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(rk_core::Error::remote(service, format!("{status}: {}", body.trim())));
    }

    resp.json::<T>()
        .await
        .map_err(|e| rk_core::Error::remote(service, format!("parse error: {e}")))
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

// ---------------------------------------------------------------------------
// AI service
// ---------------------------------------------------------------------------

/// Client for the AI service: clip analysis, thumbnail choice and focal
/// length estimation.
#[derive(Debug, Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    path: &'a Path,
}

#[derive(Serialize)]
struct SelectRequest<'a> {
    analysis: &'a MetadataMap,
    thumbnails: &'a [PathBuf],
}

#[derive(Deserialize)]
struct SelectResponse {
    thumbnail: Option<PathBuf>,
}

#[derive(Serialize)]
struct FocalLengthRequest<'a> {
    thumbnails: &'a [PathBuf],
}

#[derive(Deserialize)]
struct FocalLengthResponse {
    focal_length: Option<f64>,
}

impl AiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(join_url(&self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AiAnalyzer for AiClient {
    async fn analyze(&self, compressed: &Path) -> rk_core::Result<MetadataMap> {
        tracing::debug!(file = %compressed.display(), "Requesting AI analysis");
        send_json("ai_analysis", self.post("analyze").json(&AnalyzeRequest { path: compressed })).await
    }
}

#[async_trait]
impl ThumbnailSelector for AiClient {
    async fn select(
        &self,
        analysis: &MetadataMap,
        thumbnails: &[PathBuf],
    ) -> rk_core::Result<Option<PathBuf>> {
        let resp: SelectResponse = send_json(
            "ai_thumbnail_selection",
            self.post("select-thumbnail")
                .json(&SelectRequest { analysis, thumbnails }),
        )
        .await?;

        match resp.thumbnail {
            Some(choice) if !thumbnails.contains(&choice) => {
                tracing::warn!(choice = %choice.display(), "AI chose a thumbnail outside the candidate set");
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl FocalLengthDetector for AiClient {
    async fn detect(&self, thumbnails: &[PathBuf]) -> rk_core::Result<Option<f64>> {
        let resp: FocalLengthResponse = send_json(
            "focal_length",
            self.post("focal-length").json(&FocalLengthRequest { thumbnails }),
        )
        .await?;
        Ok(resp.focal_length.filter(|f| f.is_finite() && *f > 0.0))
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Client for the text embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingsClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl EmbeddingsClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingsClient {
    async fn embed(&self, text: &str, session: &Session) -> rk_core::Result<Vec<f32>> {
        let resp: EmbedResponse = send_json(
            "embeddings",
            self.http
                .post(&self.url)
                .bearer_auth(&session.token)
                .json(&EmbedRequest { text }),
        )
        .await?;
        if resp.embedding.is_empty() {
            return Err(rk_core::Error::remote("embeddings", "empty embedding"));
        }
        Ok(resp.embedding)
    }
}

// ---------------------------------------------------------------------------
// Thumbnail upload
// ---------------------------------------------------------------------------

/// Uploads thumbnail images one request per file.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl UploadClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ThumbnailUploader for UploadClient {
    async fn upload(
        &self,
        record_id: Option<RecordId>,
        thumbnails: &[PathBuf],
        session: &Session,
    ) -> rk_core::Result<Vec<String>> {
        let folder = record_id.map_or_else(|| "unassigned".to_string(), |id| id.to_string());
        let mut urls = Vec::with_capacity(thumbnails.len());

        for thumbnail in thumbnails {
            let name = thumbnail
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| rk_core::Error::Validation(format!("not a file: {}", thumbnail.display())))?;
            let bytes = tokio::fs::read(thumbnail).await?;

            let resp: UploadResponse = send_json(
                "upload_thumbnails",
                self.http
                    .post(join_url(&self.base_url, &format!("{folder}/{name}")))
                    .bearer_auth(&session.token)
                    .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
                    .body(bytes),
            )
            .await?;
            urls.push(resp.url);
        }
        Ok(urls)
    }
}
