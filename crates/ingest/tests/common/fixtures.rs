use async_trait::async_trait;
use ferry_core::config::IngestConfig;
use ferry_core::{AssetFingerprint, AssetRecord, AssetScope, DomainId, NamedId};
use ferry_ingest::{
    AssetCommand, AssetCommandExecutor, AssetQuery, BasicEnricher, CommandResult,
    DuplicateCheckCoordinator, IngestError, IngestResult, RemoteCopyUploader,
};
use ferry_storage::MemoryBackend;
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;

pub fn scope() -> AssetScope {
    AssetScope::new(NamedId::new(DomainId::parse("app").unwrap(), "my-app")).with_actor("me")
}

/// Asset aggregate and query index kept in memory.
#[derive(Clone, Default)]
pub struct InMemoryAssets {
    records: Arc<Mutex<Vec<AssetRecord>>>,
    commands: Arc<Mutex<Vec<AssetCommand>>>,
}

impl InMemoryAssets {
    pub fn commands(&self) -> Vec<AssetCommand> {
        self.commands.lock().clone()
    }

    pub fn get(&self, id: &DomainId) -> Option<AssetRecord> {
        self.records.lock().iter().find(|r| &r.id == id).cloned()
    }
}

#[async_trait]
impl AssetQuery for InMemoryAssets {
    async fn find_by_hash(
        &self,
        scope: &AssetScope,
        hash: &AssetFingerprint,
        file_name: &str,
        file_size: u64,
    ) -> IngestResult<Option<AssetRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| {
                r.app_id.id == scope.app.id
                    && &r.file_hash == hash
                    && r.file_name == file_name
                    && r.file_size == file_size
            })
            .cloned())
    }
}

#[async_trait]
impl AssetCommandExecutor for InMemoryAssets {
    async fn execute(&self, command: AssetCommand) -> IngestResult<CommandResult> {
        self.commands.lock().push(command.clone());

        let upload = command.upload().clone();
        let mut records = self.records.lock();
        let existing = records
            .iter()
            .position(|r| r.app_id.id == upload.app.id && r.id == upload.asset_id);

        match (&command, existing) {
            (AssetCommand::CreateAsset(_), Some(_)) => Err(IngestError::Aggregate(format!(
                "asset {} already exists",
                upload.asset_id
            ))),
            (AssetCommand::UpsertAsset(_), Some(index)) => {
                let record = &mut records[index];
                if record.file_hash == upload.file.file_hash {
                    return Ok(CommandResult {
                        changed: false,
                        asset: record.clone(),
                    });
                }
                record.version += 1;
                record.file_version += 1;
                record.file_name = upload.file.file_name;
                record.file_hash = upload.file.file_hash;
                record.file_size = upload.file.file_size;
                record.mime_type = upload.file.mime_type;
                record.tags = upload.tags;
                record.last_modified = OffsetDateTime::now_utc();
                Ok(CommandResult {
                    changed: true,
                    asset: record.clone(),
                })
            }
            (_, None) => {
                let now = OffsetDateTime::now_utc();
                let record = AssetRecord {
                    app_id: upload.app,
                    id: upload.asset_id,
                    parent_id: upload.parent_id,
                    version: 0,
                    file_version: 0,
                    file_name: upload.file.file_name,
                    file_hash: upload.file.file_hash,
                    file_size: upload.file.file_size,
                    mime_type: upload.file.mime_type,
                    tags: upload.tags,
                    created: now,
                    last_modified: now,
                };
                records.push(record.clone());
                Ok(CommandResult {
                    changed: true,
                    asset: record,
                })
            }
        }
    }
}

pub struct Harness {
    pub backend: MemoryBackend,
    pub assets: InMemoryAssets,
    pub coordinator: DuplicateCheckCoordinator,
}

impl Harness {
    pub fn new(backend: MemoryBackend) -> Self {
        let assets = InMemoryAssets::default();
        let uploader = RemoteCopyUploader::new(Arc::new(backend.clone()), &IngestConfig::default());
        let coordinator = DuplicateCheckCoordinator::new(
            uploader,
            Arc::new(backend.clone()),
            Arc::new(assets.clone()),
            Arc::new(assets.clone()),
            Arc::new(BasicEnricher),
        );
        Self {
            backend,
            assets,
            coordinator,
        }
    }

    pub fn scratch_keys(&self) -> Vec<String> {
        self.backend
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("scratch/"))
            .collect()
    }

    pub fn asset_keys(&self) -> Vec<String> {
        self.backend
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("assets/"))
            .collect()
    }
}
