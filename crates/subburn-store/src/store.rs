//! Local filesystem artifact store implementation.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use uuid::Uuid;

use subburn_models::ArtifactRef;

use crate::error::{StorageError, StorageResult};

/// Configuration for the artifact store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for stored objects
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/subburn/store"),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            root: std::env::var("ARTIFACT_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/subburn/store")),
        }
    }
}

/// Content-addressed artifact store.
///
/// Objects are named by the lowercase hex SHA-256 of their content and laid
/// out under `objects/<first two hex chars>/<digest>`. Identical content
/// always lands on the same path, so repeated ingest of the same bytes is a
/// no-op after the first.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a new store rooted at the configured directory.
    pub fn new(config: StoreConfig) -> Self {
        Self { root: config.root }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(StoreConfig::from_env())
    }

    /// Initialize the on-disk layout.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(self.objects_dir()).await?;
        fs::create_dir_all(self.staging_dir()).await?;
        info!("Artifact store initialized at {}", self.root.display());
        Ok(())
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// On-disk path for a reference.
    fn object_path(&self, artifact: &ArtifactRef) -> StorageResult<PathBuf> {
        if !artifact.is_well_formed() {
            return Err(StorageError::InvalidRef(artifact.as_str().to_string()));
        }
        let digest = artifact.as_str();
        Ok(self.objects_dir().join(&digest[..2]).join(digest))
    }

    /// Store a byte buffer; returns its content address.
    pub async fn put_bytes(&self, data: &[u8]) -> StorageResult<ArtifactRef> {
        let artifact = ArtifactRef::from_string(hex::encode(Sha256::digest(data)));
        let dst = self.object_path(&artifact)?;

        if fs::try_exists(&dst).await? {
            debug!("Artifact {} already stored, deduplicating", artifact);
            return Ok(artifact);
        }

        let staged = self.staging_dir().join(Uuid::new_v4().to_string());
        fs::write(&staged, data)
            .await
            .map_err(|e| StorageError::write_failed(format!("{}: {}", staged.display(), e)))?;
        self.commit(&staged, &dst).await?;

        debug!("Stored {} bytes as {}", data.len(), artifact);
        Ok(artifact)
    }

    /// Ingest a file from disk; returns its content address.
    ///
    /// The source file is left in place. Ingest is a hard link into the
    /// object layout when the filesystems allow it, a copy otherwise.
    pub async fn put_file(&self, path: impl AsRef<Path>) -> StorageResult<ArtifactRef> {
        let path = path.as_ref();
        let artifact = ArtifactRef::from_string(hash_file(path).await?);
        let dst = self.object_path(&artifact)?;

        if fs::try_exists(&dst).await? {
            debug!("Artifact {} already stored, deduplicating", artifact);
            return Ok(artifact);
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::hard_link(path, &dst).await {
            Ok(()) => {}
            Err(_) => {
                // Cross-device or unsupported: copy via staging, then rename.
                let staged = self.staging_dir().join(Uuid::new_v4().to_string());
                fs::copy(path, &staged).await.map_err(|e| {
                    StorageError::write_failed(format!("{}: {}", path.display(), e))
                })?;
                self.commit(&staged, &dst).await?;
            }
        }

        debug!("Ingested {} as {}", path.display(), artifact);
        Ok(artifact)
    }

    /// Read an object's full content.
    pub async fn get_bytes(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let path = self.object_path(artifact)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(artifact.clone()))
            }
            Err(e) => Err(StorageError::read_failed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Check whether an object is stored.
    pub async fn exists(&self, artifact: &ArtifactRef) -> StorageResult<bool> {
        let path = self.object_path(artifact)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Object size in bytes.
    pub async fn size(&self, artifact: &ArtifactRef) -> StorageResult<u64> {
        let path = self.object_path(artifact)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(artifact.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Materialize an object at `dir/file_name` for local consumption.
    ///
    /// FFmpeg needs real paths with meaningful extensions, so callers pick
    /// the file name. Hard link where possible, copy otherwise.
    pub async fn materialize(
        &self,
        artifact: &ArtifactRef,
        dir: impl AsRef<Path>,
        file_name: &str,
    ) -> StorageResult<PathBuf> {
        let src = self.object_path(artifact)?;
        if !fs::try_exists(&src).await? {
            return Err(StorageError::NotFound(artifact.clone()));
        }

        let dst = dir.as_ref().join(file_name);
        fs::create_dir_all(dir.as_ref()).await?;

        if fs::hard_link(&src, &dst).await.is_err() {
            fs::copy(&src, &dst).await.map_err(|e| {
                StorageError::read_failed(format!("{}: {}", src.display(), e))
            })?;
        }

        Ok(dst)
    }

    /// Move a staged file into its final object path.
    ///
    /// Rename within the store root keeps the publish atomic: readers see
    /// either no object or the whole object.
    async fn commit(&self, staged: &Path, dst: &Path) -> StorageResult<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(staged, dst).await.map_err(|e| {
            let _ = std::fs::remove_file(staged);
            StorageError::write_failed(format!("{}: {}", dst.display(), e))
        })?;
        Ok(())
    }
}

/// SHA-256 of a file's content, streamed in chunks.
async fn hash_file(path: &Path) -> StorageResult<String> {
    let mut file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::read_failed(format!(
                "{}: file not found",
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
