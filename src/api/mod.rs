//! Clip storage collaborators
//!
//! The traits here are what the rest of the crate needs from the backend:
//! uploading a finished recording and fetching stored clip bytes. [`ClipApi`]
//! implements them over HTTP.

mod client;

use std::future::Future;

use crate::clip::{ArtworkId, ClipId};

pub use client::ClipApi;

/// Errors that can occur talking to the clip backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// No token configured, or the backend rejected it
    #[error("not authorized: sign in and try again")]
    Unauthorized,
    #[error("upload failed ({status}): {message}")]
    UploadFailed { status: u16, message: String },
    #[error("fetching audio failed with status {status}")]
    FetchFailed { status: u16 },
    #[error("artwork {0} not found")]
    ArtworkNotFound(ArtworkId),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Stores a finished recording for an artwork.
pub trait ClipUploader: Send + Sync + 'static {
    fn upload(
        &self,
        artwork: ArtworkId,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> impl Future<Output = Result<ClipId, ApiError>> + Send;
}

/// Supplies the encoded bytes of stored clips.
pub trait ClipFetcher: Send + Sync + 'static {
    fn fetch(&self, clip: ClipId) -> impl Future<Output = Result<Vec<u8>, ApiError>> + Send;

    fn fetch_url(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ApiError>> + Send;
}
