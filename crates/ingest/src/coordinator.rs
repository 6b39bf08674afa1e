//! Duplicate-safe ingestion of remote blobs as assets.

use crate::error::{IngestError, IngestResult};
use crate::request::UploadRequest;
use crate::traits::{AssetCommandExecutor, AssetEnricher, AssetQuery, EnrichedAsset};
use crate::uploader::{RemoteCopyUploader, cancellable};
use ferry_core::config::{IngestConfig, StorageConfig};
use ferry_core::{AssetRecord, UploadWorkItem};
use ferry_storage::{AssetFileStore, CopyConditions, RemoteCopyStore, StorageError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of processing an upload request.
#[derive(Clone, Debug)]
pub enum IngestOutcome {
    /// The asset was created or updated.
    Asset(EnrichedAsset),
    /// An identical asset already exists; nothing was written.
    Duplicate(AssetRecord),
}

/// Resolve the remote-copy capability for an asset file store.
///
/// The store's own capability wins. Otherwise a dedicated store is built
/// from `fallback`, if any.
pub async fn resolve_remote_copy(
    files: &dyn AssetFileStore,
    fallback: Option<&StorageConfig>,
) -> IngestResult<Arc<dyn RemoteCopyStore>> {
    if let Some(store) = files.remote_copy() {
        return Ok(store);
    }

    let Some(config) = fallback else {
        return Err(IngestError::Validation(
            "asset store does not support remote copy".to_string(),
        ));
    };

    debug!(
        store = files.backend_name(),
        fallback = config.backend_name(),
        "Using dedicated remote-copy store"
    );
    ferry_storage::remote_copy_from_config(config)
        .await
        .map_err(|e| {
            IngestError::Validation(format!("asset store does not support remote copy: {e}"))
        })
}

/// Deletes a scratch slot exactly once, even when the attempt is dropped.
struct ScratchGuard {
    files: Arc<dyn AssetFileStore>,
    key: Option<String>,
}

impl ScratchGuard {
    fn new(files: Arc<dyn AssetFileStore>, key: String) -> Self {
        Self {
            files,
            key: Some(key),
        }
    }

    async fn release(mut self) {
        if let Some(key) = self.key.take() {
            delete_scratch(self.files.as_ref(), &key).await;
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(scratch = %key, "No runtime to delete scratch slot");
            return;
        };
        let files = Arc::clone(&self.files);
        handle.spawn(async move {
            delete_scratch(files.as_ref(), &key).await;
        });
    }
}

async fn delete_scratch(files: &dyn AssetFileStore, key: &str) {
    match files.delete(key).await {
        Ok(()) => debug!(scratch = %key, "Deleted scratch slot"),
        Err(StorageError::NotFound(_)) => debug!(scratch = %key, "Scratch slot already gone"),
        Err(e) => warn!(scratch = %key, error = %e, "Failed to delete scratch slot"),
    }
}

/// Copies, fingerprints, deduplicates and commits uploads.
pub struct DuplicateCheckCoordinator {
    uploader: RemoteCopyUploader,
    files: Arc<dyn AssetFileStore>,
    query: Arc<dyn AssetQuery>,
    executor: Arc<dyn AssetCommandExecutor>,
    enricher: Arc<dyn AssetEnricher>,
}

impl DuplicateCheckCoordinator {
    pub fn new(
        uploader: RemoteCopyUploader,
        files: Arc<dyn AssetFileStore>,
        query: Arc<dyn AssetQuery>,
        executor: Arc<dyn AssetCommandExecutor>,
        enricher: Arc<dyn AssetEnricher>,
    ) -> Self {
        Self {
            uploader,
            files,
            query,
            executor,
            enricher,
        }
    }

    /// Build a coordinator over `files`, resolving its remote-copy capability.
    pub async fn from_store(
        files: Arc<dyn AssetFileStore>,
        fallback: Option<&StorageConfig>,
        config: &IngestConfig,
        query: Arc<dyn AssetQuery>,
        executor: Arc<dyn AssetCommandExecutor>,
        enricher: Arc<dyn AssetEnricher>,
    ) -> IngestResult<Self> {
        let remote = resolve_remote_copy(files.as_ref(), fallback).await?;
        let uploader = RemoteCopyUploader::new(remote, config);
        Ok(Self::new(uploader, files, query, executor, enricher))
    }

    /// Process a request using its own duplicate flag.
    pub async fn handle(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> IngestResult<IngestOutcome> {
        let allow_duplicate = request.allow_duplicate;
        self.process(request, allow_duplicate, cancel).await
    }

    /// Copy the request's source, check for duplicates and commit the asset.
    ///
    /// The scratch slot is deleted on every path. A failed delete is logged
    /// and never replaces the outcome.
    pub async fn process(
        &self,
        request: UploadRequest,
        allow_duplicate: bool,
        cancel: &CancellationToken,
    ) -> IngestResult<IngestOutcome> {
        let mut item = request.work_item();
        let scratch_key = self.uploader.scratch_key(&item.scratch_id);
        let guard = ScratchGuard::new(Arc::clone(&self.files), scratch_key.clone());

        info!(
            app = %request.scope.app.id,
            asset = %request.asset_id,
            mode = ?request.mode,
            source = %request.source,
            scratch = %scratch_key,
            "Processing upload"
        );

        let outcome = self
            .run(&request, &mut item, &scratch_key, allow_duplicate, cancel)
            .await;
        guard.release().await;

        if let Err(e) = &outcome {
            warn!(asset = %request.asset_id, error = %e, "Upload failed");
        }
        outcome
    }

    async fn run(
        &self,
        request: &UploadRequest,
        item: &mut UploadWorkItem,
        scratch_key: &str,
        allow_duplicate: bool,
        cancel: &CancellationToken,
    ) -> IngestResult<IngestOutcome> {
        item.enrich_type_tag();
        let blob = self.uploader.copy_and_hash(item, cancel).await?;

        if !allow_duplicate {
            let existing = cancellable(
                cancel,
                self.query
                    .find_by_hash(&request.scope, &blob.fingerprint, &item.file_name, blob.size),
            )
            .await??;
            if let Some(existing) = existing {
                info!(
                    asset = %existing.id,
                    fingerprint = %blob.fingerprint,
                    "Duplicate asset found"
                );
                return Ok(IngestOutcome::Duplicate(existing));
            }
        }

        let command = request.to_command(item, &blob);
        debug!(command = command.name(), aggregate = %command.aggregate_id(), "Executing asset command");
        let result = cancellable(cancel, self.executor.execute(command)).await??;

        if result.changed {
            let asset = &result.asset;
            let staged = cancellable(
                cancel,
                self.files.copy_to_asset(
                    scratch_key,
                    &asset.app_id.id,
                    &asset.id,
                    asset.file_version,
                    CopyConditions::NO_OVERWRITE,
                ),
            )
            .await?;
            match staged {
                Ok(()) => {}
                Err(StorageError::AlreadyExists(key)) => {
                    debug!(key = %key, "Asset file version already stored");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let enriched = cancellable(cancel, self.enricher.enrich(result.asset, &request.scope))
            .await??;
        info!(
            asset = %enriched.asset.id,
            version = enriched.asset.version,
            file_version = enriched.asset.file_version,
            "Upload committed"
        );
        Ok(IngestOutcome::Asset(enriched))
    }
}
