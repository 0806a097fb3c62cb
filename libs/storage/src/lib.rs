//! File storage for job inputs and generated mesh outputs.
//!
//! Keys are path-like but opaque to callers (e.g. `"{job_id}/input.png"`,
//! `"{job_id}/model.stl"`). Key resolution rejects traversal escapes, so a
//! hostile key can never reach outside the configured directories.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage interface consumed by the coordinator.
///
/// Inputs (uploaded images) and outputs (generated meshes) live in separate
/// roots; both are addressed by relative keys.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist validated input bytes under a key.
    async fn save_input(&self, data: &[u8], key: &str) -> StorageResult<()>;

    /// Read input bytes back for dispatch. `NotFound` if the file is gone.
    async fn read_input(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Persist a generated artifact under a key.
    async fn save_output(&self, data: &[u8], key: &str) -> StorageResult<()>;

    /// Read a generated artifact. `NotFound` if the file is gone.
    async fn read_output(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Absolute path of an output object, for file-serving responses.
    fn output_path(&self, key: &str) -> StorageResult<PathBuf>;

    /// Delete input/output objects. Missing files are not an error.
    async fn delete(&self, input_keys: &[String], output_keys: &[String]) -> StorageResult<()>;
}

/// Filesystem-backed storage.
#[derive(Clone, Debug)]
pub struct FsStorage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl FsStorage {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Create both root directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    /// Resolve a relative key against a base directory, rejecting traversal.
    ///
    /// A key must be relative and contain only normal components: no `..`,
    /// no root, no drive prefixes.
    fn safe_resolve(base: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }

        Ok(base.join(relative))
    }

    async fn write(base: &Path, key: &str, data: &[u8]) -> StorageResult<()> {
        let target = Self::safe_resolve(base, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        debug!(key, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn read(base: &Path, key: &str) -> StorageResult<Vec<u8>> {
        let target = Self::safe_resolve(base, key)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn save_input(&self, data: &[u8], key: &str) -> StorageResult<()> {
        Self::write(&self.upload_dir, key, data).await
    }

    async fn read_input(&self, key: &str) -> StorageResult<Vec<u8>> {
        Self::read(&self.upload_dir, key).await
    }

    async fn save_output(&self, data: &[u8], key: &str) -> StorageResult<()> {
        Self::write(&self.output_dir, key, data).await
    }

    async fn read_output(&self, key: &str) -> StorageResult<Vec<u8>> {
        Self::read(&self.output_dir, key).await
    }

    fn output_path(&self, key: &str) -> StorageResult<PathBuf> {
        Self::safe_resolve(&self.output_dir, key)
    }

    async fn delete(&self, input_keys: &[String], output_keys: &[String]) -> StorageResult<()> {
        for (base, keys) in [(&self.upload_dir, input_keys), (&self.output_dir, output_keys)] {
            for key in keys {
                let target = Self::safe_resolve(base, key)?;
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => debug!(key = key.as_str(), "Deleted object"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch(name: &str) -> FsStorage {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("meshforge-storage-{}-{}", name, nanos));
        FsStorage::new(root.join("uploads"), root.join("outputs"))
    }

    #[tokio::test]
    async fn test_save_and_read_input() {
        let storage = scratch("roundtrip");
        storage.ensure_dirs().await.unwrap();

        storage
            .save_input(b"image-bytes", "job-1/input.png")
            .await
            .unwrap();
        let data = storage.read_input("job-1/input.png").await.unwrap();
        assert_eq!(data, b"image-bytes");
    }

    #[tokio::test]
    async fn test_read_missing_input_is_not_found() {
        let storage = scratch("missing");
        storage.ensure_dirs().await.unwrap();

        let err = storage.read_input("nope/input.png").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inputs_and_outputs_are_separate_roots() {
        let storage = scratch("roots");
        storage.ensure_dirs().await.unwrap();

        storage.save_input(b"in", "job/input.png").await.unwrap();
        let err = storage.read_output("job/input.png").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let storage = scratch("traversal");
        storage.ensure_dirs().await.unwrap();

        for key in [
            "../escape.stl",
            "job/../../escape.stl",
            "/etc/passwd",
            "",
            "./../x",
        ] {
            let err = storage.save_output(b"x", key).await.unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidKey(_)),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = scratch("delete");
        storage.ensure_dirs().await.unwrap();

        storage.save_output(b"mesh", "job/model.stl").await.unwrap();
        storage
            .delete(&[], &["job/model.stl".to_string()])
            .await
            .unwrap();
        // Second delete of the same key is fine
        storage
            .delete(&[], &["job/model.stl".to_string()])
            .await
            .unwrap();

        let err = storage.read_output("job/model.stl").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_output_path_resolves_inside_root() {
        let storage = FsStorage::new("/srv/uploads", "/srv/outputs");
        let path = storage.output_path("job-9/model.stl").unwrap();
        assert_eq!(path, PathBuf::from("/srv/outputs/job-9/model.stl"));

        assert!(storage.output_path("../job-9/model.stl").is_err());
    }
}
