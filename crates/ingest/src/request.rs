//! Upload requests and the asset commands they turn into.

use crate::error::{IngestError, IngestResult};
use ferry_core::{
    AssetFingerprint, AssetScope, CopiedBlob, DomainId, NamedId, OCTET_STREAM, SourceUri,
    UploadWorkItem,
};
use std::collections::BTreeSet;

/// Whether an upload creates a new asset or writes to a caller-chosen one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadMode {
    Create,
    Upsert,
}

/// A caller's request to ingest a remote blob as an asset.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub scope: AssetScope,
    pub mode: UploadMode,
    pub asset_id: DomainId,
    pub source: SourceUri,
    pub file_name: String,
    pub allow_duplicate: bool,
    pub parent_id: Option<DomainId>,
    pub tags: BTreeSet<String>,
    pub declared_mime_type: Option<String>,
}

impl UploadRequest {
    /// Request a new asset. A random asset id is used unless `custom_id` is given.
    pub fn create(
        scope: AssetScope,
        url: &str,
        file_name: &str,
        allow_duplicate: bool,
        parent_id: Option<DomainId>,
        custom_id: Option<DomainId>,
    ) -> IngestResult<Self> {
        Self::build(
            scope,
            UploadMode::Create,
            custom_id.unwrap_or_default(),
            url,
            file_name,
            allow_duplicate,
            parent_id,
        )
    }

    /// Request an insert-or-update of the asset with `asset_id`.
    pub fn upsert(
        scope: AssetScope,
        asset_id: DomainId,
        url: &str,
        file_name: &str,
        allow_duplicate: bool,
        parent_id: Option<DomainId>,
    ) -> IngestResult<Self> {
        Self::build(
            scope,
            UploadMode::Upsert,
            asset_id,
            url,
            file_name,
            allow_duplicate,
            parent_id,
        )
    }

    fn build(
        scope: AssetScope,
        mode: UploadMode,
        asset_id: DomainId,
        url: &str,
        file_name: &str,
        allow_duplicate: bool,
        parent_id: Option<DomainId>,
    ) -> IngestResult<Self> {
        let source = SourceUri::parse(url)?;
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(IngestError::Validation("file name missing".to_string()));
        }

        Ok(Self {
            scope,
            mode,
            asset_id,
            source,
            file_name: file_name.to_string(),
            allow_duplicate,
            parent_id,
            tags: BTreeSet::new(),
            declared_mime_type: None,
        })
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_declared_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.declared_mime_type = Some(mime_type.into());
        self
    }

    /// Fresh work item for one attempt at this request.
    pub fn work_item(&self) -> UploadWorkItem {
        let item = UploadWorkItem::new(self.source.clone(), self.file_name.clone())
            .with_tags(self.tags.iter().cloned());
        match &self.declared_mime_type {
            Some(mime) => item.with_declared_mime_type(mime.clone()),
            None => item,
        }
    }

    /// Command carrying the copied file into the asset aggregate.
    pub fn to_command(&self, item: &UploadWorkItem, blob: &CopiedBlob) -> AssetCommand {
        let mime_type = if blob.mime_type.is_empty() {
            OCTET_STREAM.to_string()
        } else {
            blob.mime_type.clone()
        };
        let upload = AssetUpload {
            app: self.scope.app.clone(),
            asset_id: self.asset_id.clone(),
            parent_id: self.parent_id.clone(),
            tags: item.tags.clone(),
            actor: self.scope.actor.clone(),
            file: AssetFile {
                file_name: item.file_name.clone(),
                file_hash: blob.fingerprint.clone(),
                file_size: blob.size,
                mime_type,
            },
        };

        match self.mode {
            UploadMode::Create => AssetCommand::CreateAsset(upload),
            UploadMode::Upsert => AssetCommand::UpsertAsset(upload),
        }
    }
}

/// File description handed to the asset aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetFile {
    pub file_name: String,
    pub file_hash: AssetFingerprint,
    pub file_size: u64,
    pub mime_type: String,
}

/// Payload shared by create and upsert commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetUpload {
    pub app: NamedId,
    pub asset_id: DomainId,
    pub parent_id: Option<DomainId>,
    pub tags: BTreeSet<String>,
    pub actor: Option<String>,
    pub file: AssetFile,
}

/// Command sent to the host's asset aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetCommand {
    CreateAsset(AssetUpload),
    UpsertAsset(AssetUpload),
}

impl AssetCommand {
    pub fn upload(&self) -> &AssetUpload {
        match self {
            AssetCommand::CreateAsset(upload) | AssetCommand::UpsertAsset(upload) => upload,
        }
    }

    /// Aggregate the command is routed to.
    pub fn aggregate_id(&self) -> DomainId {
        let upload = self.upload();
        DomainId::combine(&upload.app.id, &upload.asset_id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssetCommand::CreateAsset(_) => "CreateAsset",
            AssetCommand::UpsertAsset(_) => "UpsertAsset",
        }
    }
}
