//! In-process storage backend.
//!
//! Copy sources are `mem://` URIs registered with [`MemoryBackend::register_source`].
//! Copies stay pending for a configurable number of property reads before
//! settling on a configurable terminal status.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    AssetFileStore, BlobProperties, CopyConditions, CopyStatus, RemoteCopyStore, asset_key,
};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{DomainId, SourceUri};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone, Debug)]
struct MemoryBlob {
    data: Bytes,
    content_type: Option<String>,
}

#[derive(Debug)]
struct MemoryObject {
    blob: MemoryBlob,
    status: CopyStatus,
    pending_polls: u32,
    checksum_reads_hidden: u32,
}

#[derive(Clone, Debug)]
struct MemoryOptions {
    pending_polls: u32,
    terminal_status: CopyStatus,
    hidden_checksum_reads: u32,
    remote_copy: bool,
    fail_deletes: bool,
    fail_asset_copies: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            pending_polls: 0,
            terminal_status: CopyStatus::Success,
            hidden_checksum_reads: 0,
            remote_copy: true,
            fail_deletes: false,
            fail_asset_copies: false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: HashMap<String, MemoryBlob>,
    objects: HashMap<String, MemoryObject>,
    deletes: HashMap<String, usize>,
}

/// In-process object store with a remote-copy capability.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    options: Arc<MemoryOptions>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep copies pending for `polls` property reads.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.options_mut().pending_polls = polls;
        self
    }

    /// Status copies settle on once no longer pending.
    pub fn with_terminal_status(mut self, status: CopyStatus) -> Self {
        self.options_mut().terminal_status = status;
        self
    }

    /// Omit the checksum from the first `reads` completed property reads.
    pub fn with_delayed_checksum(mut self, reads: u32) -> Self {
        self.options_mut().hidden_checksum_reads = reads;
        self
    }

    /// Hide the remote-copy capability.
    pub fn without_remote_copy(mut self) -> Self {
        self.options_mut().remote_copy = false;
        self
    }

    /// Make every delete fail with an I/O error.
    pub fn with_failing_deletes(mut self) -> Self {
        self.options_mut().fail_deletes = true;
        self
    }

    /// Make every copy into an asset location fail with an I/O error.
    pub fn with_failing_asset_copies(mut self) -> Self {
        self.options_mut().fail_asset_copies = true;
        self
    }

    fn options_mut(&mut self) -> &mut MemoryOptions {
        Arc::make_mut(&mut self.options)
    }

    /// Register bytes that can be copied from `uri`.
    pub fn register_source(&self, uri: &str, data: impl Into<Bytes>, content_type: Option<&str>) {
        self.state.lock().sources.insert(
            uri.to_string(),
            MemoryBlob {
                data: data.into(),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    /// Put an object directly, bypassing the copy lifecycle.
    pub fn put(&self, key: &str, data: impl Into<Bytes>) {
        let blob = MemoryBlob {
            data: data.into(),
            content_type: None,
        };
        self.state.lock().objects.insert(
            key.to_string(),
            MemoryObject {
                blob,
                status: CopyStatus::Success,
                pending_polls: 0,
                checksum_reads_hidden: 0,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .get(key)
            .map(|object| object.blob.data.clone())
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of delete calls issued for `key`, successful or not.
    pub fn delete_count(&self, key: &str) -> usize {
        self.state.lock().deletes.get(key).copied().unwrap_or(0)
    }
}

fn md5_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

#[async_trait]
impl RemoteCopyStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn start_copy(
        &self,
        source: &SourceUri,
        dest_key: &str,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        if source.scheme() != "mem" {
            return Err(StorageError::UnsupportedSource(source.to_string()));
        }

        let mut state = self.state.lock();
        if conditions.if_none_match && state.objects.contains_key(dest_key) {
            return Err(StorageError::AlreadyExists(dest_key.to_string()));
        }
        let blob = state
            .sources
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;

        let status = if self.options.pending_polls == 0 {
            self.options.terminal_status
        } else {
            CopyStatus::Pending
        };
        state.objects.insert(
            dest_key.to_string(),
            MemoryObject {
                blob,
                status,
                pending_polls: self.options.pending_polls,
                checksum_reads_hidden: self.options.hidden_checksum_reads,
            },
        );
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn properties(&self, key: &str) -> StorageResult<BlobProperties> {
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        if object.status == CopyStatus::Pending {
            object.pending_polls = object.pending_polls.saturating_sub(1);
            if object.pending_polls == 0 {
                object.status = self.options.terminal_status;
            }
            return Ok(BlobProperties {
                copy_status: CopyStatus::Pending,
                content_hash: None,
                content_length: 0,
                content_type: None,
            });
        }

        let content_hash = if object.checksum_reads_hidden > 0 {
            object.checksum_reads_hidden -= 1;
            None
        } else {
            Some(md5_digest(&object.blob.data))
        };

        Ok(BlobProperties {
            copy_status: object.status,
            content_hash,
            content_length: object.blob.data.len() as u64,
            content_type: object.blob.content_type.clone(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl AssetFileStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn copy_to_asset(
        &self,
        scratch_key: &str,
        app: &DomainId,
        asset: &DomainId,
        file_version: i64,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let target = asset_key(app, asset, file_version);
        if self.options.fail_asset_copies {
            return Err(StorageError::Io(std::io::Error::other(
                "asset copy rejected by memory backend",
            )));
        }
        let mut state = self.state.lock();
        if conditions.if_none_match && state.objects.contains_key(&target) {
            return Err(StorageError::AlreadyExists(target));
        }
        let blob = state
            .objects
            .get(scratch_key)
            .map(|object| object.blob.clone())
            .ok_or_else(|| StorageError::NotFound(scratch_key.to_string()))?;
        state.objects.insert(
            target,
            MemoryObject {
                blob,
                status: CopyStatus::Success,
                pending_polls: 0,
                checksum_reads_hidden: 0,
            },
        );
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        *state.deletes.entry(key.to_string()).or_default() += 1;
        if self.options.fail_deletes {
            return Err(StorageError::Io(std::io::Error::other(
                "delete rejected by memory backend",
            )));
        }
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn remote_copy(&self) -> Option<Arc<dyn RemoteCopyStore>> {
        if self.options.remote_copy {
            Some(Arc::new(self.clone()))
        } else {
            None
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(uri: &str) -> SourceUri {
        SourceUri::parse(uri).unwrap()
    }

    #[tokio::test]
    async fn test_copy_completes_after_pending_polls() {
        let backend = MemoryBackend::new().with_pending_polls(2);
        backend.register_source("mem://src/a.png", &b"png-bytes"[..], Some("image/png"));

        backend
            .start_copy(&source("mem://src/a.png"), "scratch/1", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap();

        let first = backend.properties("scratch/1").await.unwrap();
        assert_eq!(first.copy_status, CopyStatus::Pending);
        let second = backend.properties("scratch/1").await.unwrap();
        assert_eq!(second.copy_status, CopyStatus::Pending);
        let done = backend.properties("scratch/1").await.unwrap();
        assert_eq!(done.copy_status, CopyStatus::Success);
        assert_eq!(done.content_length, 9);
        assert_eq!(done.content_hash, Some(md5_digest(b"png-bytes")));
        assert_eq!(done.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_occupied_destination_is_rejected() {
        let backend = MemoryBackend::new();
        backend.register_source("mem://src/a", &b"a"[..], None);
        backend.put("scratch/taken", &b"x"[..]);

        let err = backend
            .start_copy(&source("mem://src/a"), "scratch/taken", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .start_copy(&source("mem://src/missing"), "scratch/1", CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_copy_to_asset_no_overwrite() {
        let backend = MemoryBackend::new();
        let app = DomainId::parse("app").unwrap();
        let asset = DomainId::parse("asset").unwrap();
        backend.put("scratch/1", &b"data"[..]);

        backend
            .copy_to_asset("scratch/1", &app, &asset, 0, CopyConditions::NO_OVERWRITE)
            .await
            .unwrap();
        assert_eq!(backend.get("assets/app/asset/0").as_deref(), Some(&b"data"[..]));

        let err = backend
            .copy_to_asset("scratch/1", &app, &asset, 0, CopyConditions::NO_OVERWRITE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_capability_can_be_hidden() {
        assert!(MemoryBackend::new().remote_copy().is_some());
        assert!(MemoryBackend::new().without_remote_copy().remote_copy().is_none());
    }
}
