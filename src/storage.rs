use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

/// Per-feature folders created under the upload root at startup.
pub const UPLOAD_SUBFOLDERS: &[&str] = &[
    "avatars",
    "projects",
    "notes",
    "caminatas",
    "pagos",
    "calendar",
    "songs",
    "playlists",
    "instructions",
    "maps",
    "covers",
    "aboutus",
    "files",
];

/// Prefix under which stored keys are referenced from rows and served over HTTP.
pub const PUBLIC_PREFIX: &str = "uploads";

const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
}

/// Files on local disk, keyed by path relative to the upload root.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_layout(&self) -> anyhow::Result<()> {
        for sub in UPLOAD_SUBFOLDERS {
            let dir = self.root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create upload folder {}", dir.display()))?;
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        anyhow::ensure!(
            rel.components().all(|c| matches!(c, Component::Normal(_))),
            "invalid storage key {key:?}"
        );
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir for {key}"))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {key}"))?;
        debug!(key, bytes = body.len(), "stored upload");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove {key}"))?;
        debug!(key, "deleted upload");
        Ok(())
    }
}

/// A file part taken from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file type not allowed: {0}")]
    UnsupportedType(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Lower-cased extension when it is one of the accepted image types.
pub fn allowed_image_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_IMAGE_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// Store an image under a fresh unique name in `subfolder` and return the
/// public path recorded on rows (`uploads/<subfolder>/<uuid>.<ext>`).
pub async fn save_image(
    storage: &dyn StorageClient,
    file: &UploadedFile,
    subfolder: &str,
) -> Result<String, UploadError> {
    let ext = allowed_image_extension(&file.filename)
        .ok_or_else(|| UploadError::UnsupportedType(file.filename.clone()))?;
    let key = format!("{}/{}.{}", subfolder, Uuid::new_v4(), ext);
    storage.put_object(&key, file.body.clone()).await?;
    Ok(format!("{PUBLIC_PREFIX}/{key}"))
}

/// Inverse of the path returned by [`save_image`].
pub fn key_from_public_path(path: &str) -> Option<&str> {
    path.strip_prefix(PUBLIC_PREFIX)?.strip_prefix('/')
}
