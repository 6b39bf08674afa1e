//! Asset storage abstraction and backends for Ferry.
//!
//! This crate provides:
//! - Server-side remote copy into scratch slots, with copy status polling
//! - Permanent, versioned asset file locations
//! - Backends: in-process memory, local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    ASSETS_PREFIX, AssetFileStore, BlobProperties, CopyConditions, CopyStatus, RemoteCopyStore,
    asset_key,
};

use ferry_core::config::StorageConfig;
use std::sync::Arc;

/// Create an asset file store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn AssetFileStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 { .. } => Ok(Arc::new(s3_from_config(config).await?)),
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

/// Create a dedicated remote-copy store from configuration.
///
/// Used when the asset file store does not expose the capability itself.
/// Memory storage is process-local, so a second instance could never see
/// the first one's objects; it is rejected.
pub async fn remote_copy_from_config(
    config: &StorageConfig,
) -> StorageResult<Arc<dyn RemoteCopyStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 { .. } => Ok(Arc::new(s3_from_config(config).await?)),
        StorageConfig::Memory => Err(StorageError::Config(
            "memory storage cannot provide a separate remote-copy store".to_string(),
        )),
    }
}

async fn s3_from_config(config: &StorageConfig) -> StorageResult<S3Backend> {
    let StorageConfig::S3 {
        bucket,
        endpoint,
        region,
        prefix,
        access_key_id,
        secret_access_key,
        force_path_style,
    } = config
    else {
        return Err(StorageError::Config(format!(
            "expected s3 storage config, got {}",
            config.backend_name()
        )));
    };

    S3Backend::new(
        bucket,
        endpoint.clone(),
        region.clone(),
        prefix.clone(),
        access_key_id.clone(),
        secret_access_key.clone(),
        *force_path_style,
    )
    .await
}
