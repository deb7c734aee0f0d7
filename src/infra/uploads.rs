//! Filesystem storage for normalized product images.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use slug::slugify;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::catalog::media::{BlobError, BlobStore, StoredBlob};

/// Filesystem-backed blob storage rooted at the configured media directory.
#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Read a stored blob into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, BlobError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Resolve the absolute filesystem path for a stored blob.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(BlobError::InvalidPath(stored_path.to_string()));
        }

        Ok(self.root.join(relative))
    }

    fn build_stored_path(&self, file_name: &str) -> String {
        let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
        let directory = format!("{year}/{:02}/{:02}", month as u8, day);
        let identifier = Uuid::new_v4();
        let filename = sanitize_filename(file_name);
        format!("{directory}/{identifier}-{filename}")
    }
}

#[async_trait]
impl BlobStore for UploadStorage {
    async fn put(&self, file_name: &str, bytes: Bytes) -> Result<StoredBlob, BlobError> {
        let stored_path = self.build_stored_path(file_name);
        let absolute = self.resolve(&stored_path)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(err.into());
        }

        let checksum = hex::encode(Sha256::digest(&bytes));
        Ok(StoredBlob {
            stored_path,
            checksum,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Missing files are treated as success.
    async fn remove(&self, stored_path: &str) -> Result<(), BlobError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("upload");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "upload".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
