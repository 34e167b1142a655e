//! Clip identity and byte sources
//!
//! A clip is one finalized voice recording attached to an artwork. Until it is
//! uploaded the bytes live in memory; afterwards the server id is enough to
//! fetch them again.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side identifier of an artwork (image) that clips belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtworkId(pub u64);

impl fmt::Display for ArtworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side identifier of an uploaded clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the encoded bytes of a clip come from.
#[derive(Debug, Clone)]
pub enum ClipSource {
    /// Bytes held in memory (fresh recordings, local files).
    Memory(Arc<[u8]>),
    /// An uploaded clip, fetched through the clip API.
    Remote(ClipId),
    /// An absolute URL serving the encoded audio.
    Url(String),
}

impl ClipSource {
    pub fn memory(bytes: impl Into<Arc<[u8]>>) -> Self {
        ClipSource::Memory(bytes.into())
    }
}

/// A finalized, immutable audio clip.
#[derive(Debug, Clone)]
pub struct AudioClip {
    id: Uuid,
    owner: ArtworkId,
    source: ClipSource,
    mime_type: String,
}

impl AudioClip {
    /// A freshly recorded clip that has not been uploaded yet.
    pub fn in_memory(owner: ArtworkId, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            source: ClipSource::memory(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// A clip that already lives on the server.
    pub fn remote(owner: ArtworkId, clip_id: ClipId, mime_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            source: ClipSource::Remote(clip_id),
            mime_type: mime_type.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> ArtworkId {
        self.owner
    }

    pub fn source(&self) -> &ClipSource {
        &self.source
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The encoded bytes, when the clip is held in memory.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.source {
            ClipSource::Memory(bytes) => Some(&bytes[..]),
            _ => None,
        }
    }
}

/// One row of the per-artwork clip listing returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub id: ClipId,
    pub filename: String,
    pub image_id: ArtworkId,
    pub user_id: u64,
    /// Not every server revision sends this field.
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

/// File extension used when uploading a clip of the given MIME type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        "audio/mpeg" => "mp3",
        _ => "bin",
    }
}
