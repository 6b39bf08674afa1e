//! Host collaborators the ingest pipeline depends on.

use crate::error::IngestResult;
use crate::request::AssetCommand;
use async_trait::async_trait;
use ferry_core::{AssetFingerprint, AssetRecord, AssetScope, mime::file_type};

/// Looks up existing assets by content fingerprint.
#[async_trait]
pub trait AssetQuery: Send + Sync + 'static {
    /// Find an asset in `scope` with the same fingerprint, name and size.
    async fn find_by_hash(
        &self,
        scope: &AssetScope,
        hash: &AssetFingerprint,
        file_name: &str,
        file_size: u64,
    ) -> IngestResult<Option<AssetRecord>>;
}

/// Outcome of executing an asset command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the aggregate changed, i.e. a new file version must be stored.
    pub changed: bool,
    pub asset: AssetRecord,
}

/// Executes asset commands against the host's aggregate.
#[async_trait]
pub trait AssetCommandExecutor: Send + Sync + 'static {
    async fn execute(&self, command: AssetCommand) -> IngestResult<CommandResult>;
}

/// Asset record decorated for presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichedAsset {
    pub asset: AssetRecord,
    pub file_type: Option<String>,
    pub is_image: bool,
}

impl EnrichedAsset {
    pub fn new(asset: AssetRecord) -> Self {
        Self {
            file_type: file_type(&asset.file_name),
            is_image: asset.mime_type.starts_with("image/"),
            asset,
        }
    }
}

/// Turns an asset record into its presentation form.
#[async_trait]
pub trait AssetEnricher: Send + Sync + 'static {
    async fn enrich(&self, asset: AssetRecord, scope: &AssetScope) -> IngestResult<EnrichedAsset>;
}

/// Enricher deriving only what the record itself carries.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicEnricher;

#[async_trait]
impl AssetEnricher for BasicEnricher {
    async fn enrich(&self, asset: AssetRecord, _scope: &AssetScope) -> IngestResult<EnrichedAsset> {
        Ok(EnrichedAsset::new(asset))
    }
}
