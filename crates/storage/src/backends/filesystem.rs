//! Local filesystem storage backend.
//!
//! Remote copies accept `file://` sources. The copy runs in a background
//! task that streams the source into a temp file next to the destination,
//! computes an MD5 checksum on the way, and renames the temp file into
//! place. Copy status lives in an in-process side table, so a restart
//! reports finished copies as successful without a checksum.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    AssetFileStore, BlobProperties, CopyConditions, CopyStatus, RemoteCopyStore, asset_key,
};
use async_trait::async_trait;
use ferry_core::{DomainId, SourceUri};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming copies (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
struct CopyState {
    status: CopyStatus,
    checksum: Option<Vec<u8>>,
}

/// Local filesystem object store.
#[derive(Clone, Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
    copies: Arc<Mutex<HashMap<String, CopyState>>>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            copies: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the canonicalization on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation.
    ///
    /// Returns an error if the key, or any existing ancestor of it, would
    /// resolve outside the storage root.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if Path::new(key)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // The nearest existing path (the key itself or an ancestor) must stay
        // inside the root once symlinks are resolved.
        let mut probe = Some(path.as_path());
        while let Some(candidate) = probe {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let canonical = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            probe = candidate.parent();
        }

        Ok(path)
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or(temp_name),
        )
    }

    /// Stream `source` into `temp_path`, returning the MD5 of the bytes.
    async fn stream_into(source: &Path, temp_path: &Path) -> std::io::Result<Vec<u8>> {
        let mut input = fs::File::open(source).await?;
        let mut output = fs::File::create(temp_path).await?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            output.write_all(&buf[..n]).await?;
        }
        output.sync_all().await?;
        Ok(hasher.finalize().to_vec())
    }

    /// Move a completed temp file into place.
    ///
    /// With `if_none_match` the final step is a hard link, which fails
    /// atomically when the destination already exists.
    async fn publish(
        temp_path: &Path,
        path: &Path,
        conditions: CopyConditions,
    ) -> std::io::Result<()> {
        if conditions.if_none_match {
            let linked = fs::hard_link(temp_path, path).await;
            let _ = fs::remove_file(temp_path).await;
            linked
        } else {
            fs::rename(temp_path, path).await
        }
    }

    fn source_path(source: &SourceUri) -> StorageResult<PathBuf> {
        if source.scheme() != "file" {
            return Err(StorageError::UnsupportedSource(source.to_string()));
        }
        source
            .as_url()
            .to_file_path()
            .map_err(|_| StorageError::UnsupportedSource(source.to_string()))
    }
}

fn map_io_error(err: std::io::Error, key: &str) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(key.to_string()),
        _ => StorageError::Io(err),
    }
}

#[async_trait]
impl RemoteCopyStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn start_copy(
        &self,
        source: &SourceUri,
        dest_key: &str,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let source_path = Self::source_path(source)?;
        let path = self.key_path(dest_key).await?;

        let meta = fs::metadata(&source_path)
            .await
            .map_err(|e| map_io_error(e, &source.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(source.to_string()));
        }
        let on_disk = conditions.if_none_match && fs::try_exists(&path).await?;

        // The occupancy check and the claim share one critical section.
        {
            let mut copies = self.copies.lock();
            if conditions.if_none_match && (on_disk || copies.contains_key(dest_key)) {
                return Err(StorageError::AlreadyExists(dest_key.to_string()));
            }
            copies.insert(
                dest_key.to_string(),
                CopyState {
                    status: CopyStatus::Pending,
                    checksum: None,
                },
            );
        }

        if let Err(e) = self.ensure_parent(&path).await {
            self.copies.lock().remove(dest_key);
            return Err(e);
        }

        let copies = Arc::clone(&self.copies);
        let key = dest_key.to_string();
        tokio::spawn(async move {
            let temp_path = Self::temp_path_for(&path);
            let result = match Self::stream_into(&source_path, &temp_path).await {
                Ok(checksum) => Self::publish(&temp_path, &path, conditions)
                    .await
                    .map(|_| checksum),
                Err(err) => {
                    let _ = fs::remove_file(&temp_path).await;
                    Err(err)
                }
            };
            let state = match result {
                Ok(checksum) => CopyState {
                    status: CopyStatus::Success,
                    checksum: Some(checksum),
                },
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "filesystem copy failed");
                    CopyState {
                        status: CopyStatus::Failed,
                        checksum: None,
                    }
                }
            };
            copies.lock().insert(key, state);
        });

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn properties(&self, key: &str) -> StorageResult<BlobProperties> {
        let path = self.key_path(key).await?;
        let tracked = self.copies.lock().get(key).cloned();

        match tracked {
            Some(CopyState {
                status: CopyStatus::Success,
                checksum,
            }) => {
                let meta = fs::metadata(&path).await.map_err(|e| map_io_error(e, key))?;
                Ok(BlobProperties {
                    copy_status: CopyStatus::Success,
                    content_hash: checksum,
                    content_length: meta.len(),
                    content_type: None,
                })
            }
            Some(state) => Ok(BlobProperties {
                copy_status: state.status,
                content_hash: None,
                content_length: 0,
                content_type: None,
            }),
            None => {
                let meta = fs::metadata(&path).await.map_err(|e| map_io_error(e, key))?;
                Ok(BlobProperties {
                    copy_status: CopyStatus::Success,
                    content_hash: None,
                    content_length: meta.len(),
                    content_type: None,
                })
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[async_trait]
impl AssetFileStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy_to_asset(
        &self,
        scratch_key: &str,
        app: &DomainId,
        asset: &DomainId,
        file_version: i64,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let target_key = asset_key(app, asset, file_version);
        let source = self.key_path(scratch_key).await?;
        let path = self.key_path(&target_key).await?;

        if conditions.if_none_match && fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists(target_key));
        }
        if !fs::try_exists(&source).await? {
            return Err(StorageError::NotFound(scratch_key.to_string()));
        }

        self.ensure_parent(&path).await?;
        let temp_path = Self::temp_path_for(&path);
        if let Err(err) = fs::copy(&source, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(map_io_error(err, scratch_key));
        }
        Self::publish(&temp_path, &path, conditions)
            .await
            .map_err(|e| map_io_error(e, &target_key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        let tracked = self.copies.lock().remove(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // A failed copy leaves nothing on disk; forgetting it is the whole delete.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && tracked.is_some() => Ok(()),
            Err(e) => Err(map_io_error(e, key)),
        }
    }

    fn remote_copy(&self) -> Option<Arc<dyn RemoteCopyStore>> {
        Some(Arc::new(self.clone()))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_copy(backend: &FilesystemBackend, key: &str) -> BlobProperties {
        loop {
            let props = backend.properties(key).await.unwrap();
            if props.copy_status.is_terminal() {
                return props;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn file_source(path: &Path) -> SourceUri {
        SourceUri::parse(&format!("file://{}", path.display())).unwrap()
    }

    #[tokio::test]
    async fn test_copy_from_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("photo.png");
        std::fs::write(&src, b"not really a png").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend
            .start_copy(&file_source(&src), "scratch/abc", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap();

        let props = wait_for_copy(&backend, "scratch/abc").await;
        assert_eq!(props.copy_status, CopyStatus::Success);
        assert_eq!(props.content_length, 16);
        let mut hasher = Md5::new();
        hasher.update(b"not really a png");
        assert_eq!(props.content_hash, Some(hasher.finalize().to_vec()));
        assert!(dir.path().join("scratch/abc").exists());
    }

    #[tokio::test]
    async fn test_copy_into_occupied_slot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.txt");
        std::fs::write(&src, b"a").unwrap();
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();
        std::fs::write(dir.path().join("scratch/taken"), b"old").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let err = backend
            .start_copy(&file_source(&src), "scratch/taken", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_copies_claim_slot_once() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.txt");
        std::fs::write(&src, b"a").unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let source = file_source(&src);

        for round in 0..20 {
            let key = format!("scratch/race-{round}");
            let attempts: Vec<_> = (0..4)
                .map(|_| {
                    let backend = backend.clone();
                    let source = source.clone();
                    let key = key.clone();
                    tokio::spawn(async move {
                        backend
                            .start_copy(&source, &key, CopyConditions::NO_OVERWRITE)
                            .await
                    })
                })
                .collect();
            let mut results = Vec::new();
            for attempt in attempts {
                results.push(attempt.await);
            }

            let claimed = results
                .iter()
                .filter(|r| matches!(r, Ok(Ok(()))))
                .count();
            let rejected = results
                .iter()
                .filter(|r| matches!(r, Ok(Err(StorageError::AlreadyExists(_)))))
                .count();
            assert_eq!((claimed, rejected), (1, 3), "round {round}");

            let props = wait_for_copy(&backend, &key).await;
            assert_eq!(props.copy_status, CopyStatus::Success);
        }
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let missing = dir.path().join("nope.bin");
        let err = backend
            .start_copy(&file_source(&missing), "scratch/x", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_file_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let source = SourceUri::parse("https://example.com/a.png").unwrap();
        let err = backend
            .start_copy(&source, "scratch/x", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedSource(_)));
    }

    #[tokio::test]
    async fn test_copy_to_asset_and_delete_scratch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();
        std::fs::write(dir.path().join("scratch/s1"), b"payload").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        let app = DomainId::parse("app").unwrap();
        let asset = DomainId::parse("asset").unwrap();
        backend
            .copy_to_asset("scratch/s1", &app, &asset, 2, CopyConditions::NO_OVERWRITE)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("assets/app/asset/2")).unwrap(),
            b"payload"
        );

        let err = backend
            .copy_to_asset("scratch/s1", &app, &asset, 2, CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        backend.delete("scratch/s1").await.unwrap();
        assert!(!dir.path().join("scratch/s1").exists());
        assert!(matches!(
            backend.delete("scratch/s1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.properties("../escape").await.is_err());
        assert!(backend.properties("/absolute/path").await.is_err());
        assert!(backend.properties("foo/../../etc/passwd").await.is_err());
        assert!(matches!(
            backend.properties("valid/nested/key").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();

        let result = backend.delete("escape/nested/file.txt").await;
        match result {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }
    }
}
