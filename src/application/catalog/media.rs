//! Seams for image normalization and blob storage used by product writes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

/// A file received in a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Re-encoded image ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    /// Original stem with a `.jpg` extension.
    pub file_name: String,
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image could not be encoded: {0}")]
    Encode(String),
}

/// Pre-persist transform applied to every product image.
pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, upload: &Upload) -> Result<NormalizedImage, ImageError>;
}

/// Location and fingerprint of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid blob path `{0}`")]
    InvalidPath(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: Bytes) -> Result<StoredBlob, BlobError>;

    async fn remove(&self, stored_path: &str) -> Result<(), BlobError>;
}

/// Best-effort removal of blobs written for a save that did not commit.
pub(crate) async fn discard_blobs(store: &Arc<dyn BlobStore>, paths: &[String]) {
    for path in paths {
        if let Err(err) = store.remove(path).await {
            warn!(
                target = "catalogue::application::catalog::media",
                stored_path = %path,
                error = %err,
                "Failed to remove blob of an aborted save"
            );
        }
    }
}

/// Public URLs for stored blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrls {
    base: String,
}

impl MediaUrls {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, stored_path: &str) -> String {
        format!("{}/{}", self.base, stored_path.trim_start_matches('/'))
    }
}
