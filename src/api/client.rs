//! HTTP client for the artwork backend
//!
//! Endpoints:
//! - `POST /upload-audio/{image_id}` multipart upload, bearer token required
//! - `GET /audio/{id}` raw clip bytes
//! - `GET /image/{image_id}/audios` clip listing

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{ApiError, ClipFetcher, ClipUploader};
use crate::clip::{extension_for_mime, ArtworkId, ClipId, ClipRecord};

/// Shared HTTP client (connection pool reused across requests)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            })
    })
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: ClipId,
}

/// Error body of the backend
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: serde_json::Value,
}

/// Client for one backend, optionally authenticated.
#[derive(Debug, Clone)]
pub struct ClipApi {
    base_url: String,
    token: Option<String>,
}

impl ClipApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let token = token.filter(|t| !t.trim().is_empty());
        Self { base_url, token }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Direct URL of a clip, for hosts that stream it themselves.
    pub fn clip_url(&self, clip: ClipId) -> String {
        format!("{}/audio/{}", self.base_url, clip)
    }

    /// All clips attached to an artwork.
    pub async fn list_clips(&self, artwork: ArtworkId) -> Result<Vec<ClipRecord>, ApiError> {
        let url = format!("{}/image/{}/audios", self.base_url, artwork);
        log::debug!("Listing clips: GET {}", url);

        let response = get_http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let clips: Vec<ClipRecord> = response
                    .json()
                    .await
                    .map_err(|e| ApiError::Parse(e.to_string()))?;
                log::info!("Artwork {} has {} clips", artwork, clips.len());
                Ok(clips)
            }
            StatusCode::NOT_FOUND => Err(ApiError::ArtworkNotFound(artwork)),
            status => Err(ApiError::FetchFailed {
                status: status.as_u16(),
            }),
        }
    }

    async fn get_audio(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        log::debug!("Fetching audio: GET {}", url);

        let response = get_http_client()
            .get(url)
            .header(ACCEPT, "audio/*")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Audio fetch failed with status {}", status);
            return Err(ApiError::FetchFailed {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("audio/") {
            log::warn!("Unexpected content type for audio: {:?}", content_type);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        log::info!("Fetched {} bytes of audio ({})", bytes.len(), content_type);
        Ok(bytes.to_vec())
    }
}

impl ClipUploader for ClipApi {
    async fn upload(
        &self,
        artwork: ArtworkId,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<ClipId, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::Unauthorized)?;
        let filename = format!("recording.{}", extension_for_mime(mime_type));

        log::info!(
            "Uploading {} ({} bytes) for artwork {}",
            filename,
            bytes.len(),
            artwork
        );

        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_type)
            .map_err(|e| ApiError::UploadFailed {
                status: 0,
                message: e.to_string(),
            })?;
        let form = Form::new()
            .part("audio", part)
            .text("image_id", artwork.to_string());

        let response = get_http_client()
            .post(format!("{}/upload-audio/{}", self.base_url, artwork))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            log::warn!("Upload rejected: not authorized");
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = error_message(response).await;
            log::error!("Upload failed ({}): {}", status, message);
            return Err(ApiError::UploadFailed {
                status: status.as_u16(),
                message,
            });
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        log::info!("Upload successful: clip {}", uploaded.id);
        Ok(uploaded.id)
    }
}

impl ClipFetcher for ClipApi {
    async fn fetch(&self, clip: ClipId) -> Result<Vec<u8>, ApiError> {
        self.get_audio(&self.clip_url(clip)).await
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.get_audio(url).await
    }
}

/// Best-effort human readable message from an error response.
async fn error_message(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(ErrorResponse {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorResponse { detail }) => detail.to_string(),
        Err(_) => text,
    }
}
