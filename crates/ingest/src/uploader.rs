//! Server-side copy into a scratch slot, followed by fingerprinting.

use crate::error::{IngestError, IngestResult};
use ferry_core::config::IngestConfig;
use ferry_core::{
    AssetFingerprint, CopiedBlob, MapMimeTable, MimeTable, ScratchId,
    UploadWorkItem, resolve_mime_type,
};
use ferry_storage::{BlobProperties, CopyConditions, CopyStatus, RemoteCopyStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> IngestResult<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(IngestError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Copies a source URI into a scratch slot and computes its fingerprint.
pub struct RemoteCopyUploader {
    store: Arc<dyn RemoteCopyStore>,
    mime_table: Arc<dyn MimeTable>,
    poll_interval: Duration,
    scratch_prefix: String,
}

impl RemoteCopyUploader {
    pub fn new(store: Arc<dyn RemoteCopyStore>, config: &IngestConfig) -> Self {
        Self {
            store,
            mime_table: Arc::new(MapMimeTable::new(config.mime_overrides.clone())),
            poll_interval: config.poll_interval(),
            scratch_prefix: config.scratch_prefix.clone(),
        }
    }

    pub fn with_mime_table(mut self, table: Arc<dyn MimeTable>) -> Self {
        self.mime_table = table;
        self
    }

    /// Storage key of a scratch slot.
    pub fn scratch_key(&self, id: &ScratchId) -> String {
        id.key(&self.scratch_prefix)
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Copy `item.source` into the item's scratch slot and fingerprint it.
    ///
    /// On success the result is also recorded on the work item. The scratch
    /// slot is left in place; deleting it is the caller's responsibility.
    pub async fn copy_and_hash(
        &self,
        item: &mut UploadWorkItem,
        cancel: &CancellationToken,
    ) -> IngestResult<CopiedBlob> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let key = self.scratch_key(&item.scratch_id);
        debug!(
            backend = self.store.backend_name(),
            source = %item.source,
            scratch = %key,
            "Starting remote copy"
        );

        cancellable(
            cancel,
            self.store
                .start_copy(&item.source, &key, CopyConditions::NO_OVERWRITE),
        )
        .await??;

        let mut props = self.wait_for_copy(&key, cancel).await?;
        if props.copy_status != CopyStatus::Success {
            return Err(IngestError::Store(props.copy_status.to_string()));
        }

        // Some stores publish the checksum shortly after the copy settles.
        if props.content_hash.is_none() {
            props = cancellable(cancel, self.store.properties(&key)).await??;
        }

        let mime_type = resolve_mime_type(
            props.content_type.as_deref(),
            &item.file_name,
            self.mime_table.as_ref(),
        );

        let blob = CopiedBlob {
            fingerprint: AssetFingerprint::compute(
                props.content_hash.as_deref(),
                &item.file_name,
                props.content_length,
            ),
            mime_type,
            size: props.content_length,
        };

        info!(
            scratch = %key,
            size = blob.size,
            mime_type = %blob.mime_type,
            has_checksum = props.content_hash.is_some(),
            "Remote copy complete"
        );

        item.set_copied(blob.clone());
        Ok(blob)
    }

    async fn wait_for_copy(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> IngestResult<BlobProperties> {
        loop {
            let props = cancellable(cancel, self.store.properties(key)).await??;
            if props.copy_status != CopyStatus::Pending {
                return Ok(props);
            }
            cancellable(cancel, tokio::time::sleep(self.poll_interval)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{OCTET_STREAM, SourceUri};
    use ferry_storage::MemoryBackend;

    fn uploader(backend: &MemoryBackend) -> RemoteCopyUploader {
        RemoteCopyUploader::new(Arc::new(backend.clone()), &IngestConfig::default())
    }

    fn item(uri: &str, name: &str) -> UploadWorkItem {
        UploadWorkItem::new(SourceUri::parse(uri).unwrap(), name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_copy_settles() {
        let backend = MemoryBackend::new().with_pending_polls(3);
        backend.register_source("mem://src/a.png", &b"image"[..], Some("image/png"));
        let uploader = uploader(&backend);
        let mut work = item("mem://src/a.png", "a.png");

        let blob = uploader
            .copy_and_hash(&mut work, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(blob.size, 5);
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(work.copied(), Some(&blob));
        assert!(backend.contains(&uploader.scratch_key(&work.scratch_id)));
    }

    #[tokio::test]
    async fn test_octet_stream_falls_back_to_extension() {
        let backend = MemoryBackend::new();
        backend.register_source("mem://src/a", &b"x"[..], Some(OCTET_STREAM));
        let mut work = item("mem://src/a", "a.png");

        let blob = uploader(&backend)
            .copy_and_hash(&mut work, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(blob.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_unknown_extension_keeps_octet_stream() {
        let backend = MemoryBackend::new();
        backend.register_source("mem://src/a", &b"x"[..], Some(OCTET_STREAM));
        let mut work = item("mem://src/a", "blob.zzz").with_declared_mime_type("text/plain");

        let blob = uploader(&backend)
            .copy_and_hash(&mut work, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(blob.mime_type, OCTET_STREAM);
        assert_eq!(work.declared_mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_delayed_checksum_is_refetched() {
        let backend = MemoryBackend::new().with_delayed_checksum(1);
        backend.register_source("mem://src/a", &b"abc"[..], None);
        let mut with_refetch = item("mem://src/a", "a.txt");
        let blob = uploader(&backend)
            .copy_and_hash(&mut with_refetch, &CancellationToken::new())
            .await
            .unwrap();

        let eager = MemoryBackend::new();
        eager.register_source("mem://src/a", &b"abc"[..], None);
        let mut direct = item("mem://src/a", "a.txt");
        let expected = uploader(&eager)
            .copy_and_hash(&mut direct, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(blob.fingerprint, expected.fingerprint);
    }

    #[tokio::test]
    async fn test_failed_copy_reports_status() {
        let backend = MemoryBackend::new().with_terminal_status(CopyStatus::Failed);
        backend.register_source("mem://src/a", &b"x"[..], None);
        let mut work = item("mem://src/a", "a.txt");

        let err = uploader(&backend)
            .copy_and_hash(&mut work, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(status) if status == "failed"));
        assert!(work.copied().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let backend = MemoryBackend::new();
        backend.register_source("mem://src/a", &b"x"[..], None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut work = item("mem://src/a", "a.txt");

        let err = uploader(&backend)
            .copy_and_hash(&mut work, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert!(backend.keys().is_empty());
    }
}
