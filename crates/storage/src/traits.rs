//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use ferry_core::{DomainId, SourceUri};
use std::fmt;
use std::sync::Arc;

/// Top-level prefix of permanent asset files.
pub const ASSETS_PREFIX: &str = "assets";

/// Key of a permanent asset file: `assets/{app}/{asset}/{file_version}`.
pub fn asset_key(app: &DomainId, asset: &DomainId, file_version: i64) -> String {
    format!("{ASSETS_PREFIX}/{app}/{asset}/{file_version}")
}

/// State of a server-side copy as reported by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
    Aborted,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Success => "success",
            CopyStatus::Failed => "failed",
            CopyStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Pending)
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preconditions applied to the destination of a copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyConditions {
    /// Fail with `AlreadyExists` if the destination is occupied.
    pub if_none_match: bool,
}

impl CopyConditions {
    /// Destination must not exist.
    pub const NO_OVERWRITE: CopyConditions = CopyConditions {
        if_none_match: true,
    };

    /// Destination is replaced if present.
    pub const OVERWRITE: CopyConditions = CopyConditions {
        if_none_match: false,
    };
}

/// Properties of a copy destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobProperties {
    pub copy_status: CopyStatus,
    /// Store-computed checksum of the content; may lag behind completion.
    pub content_hash: Option<Vec<u8>>,
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// A store that can copy a remote blob into one of its own keys server-side.
#[async_trait]
pub trait RemoteCopyStore: Send + Sync + 'static {
    /// Start copying `source` into `dest_key`.
    ///
    /// Returns once the copy is accepted. Completion is observed through
    /// [`RemoteCopyStore::properties`]. Fails with `AlreadyExists` when the
    /// conditions forbid overwriting an occupied key and `NotFound` when the
    /// source does not exist.
    async fn start_copy(
        &self,
        source: &SourceUri,
        dest_key: &str,
        conditions: CopyConditions,
    ) -> StorageResult<()>;

    /// Current properties of a copy destination.
    async fn properties(&self, key: &str) -> StorageResult<BlobProperties>;

    /// Get the backend name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Permanent asset file storage.
#[async_trait]
pub trait AssetFileStore: Send + Sync + 'static {
    /// Copy a scratch object to the permanent location of an asset file version.
    async fn copy_to_asset(
        &self,
        scratch_key: &str,
        app: &DomainId,
        asset: &DomainId,
        file_version: i64,
        conditions: CopyConditions,
    ) -> StorageResult<()>;

    /// Delete a scratch object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// The remote-copy capability of this store, if it has one.
    fn remote_copy(&self) -> Option<Arc<dyn RemoteCopyStore>> {
        None
    }

    /// Get the backend name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_layout() {
        let app = DomainId::parse("app").unwrap();
        let asset = DomainId::parse("logo").unwrap();
        assert_eq!(asset_key(&app, &asset, 3), "assets/app/logo/3");
    }

    #[test]
    fn test_copy_status_terminal() {
        assert!(!CopyStatus::Pending.is_terminal());
        assert!(CopyStatus::Failed.is_terminal());
        assert_eq!(CopyStatus::Aborted.to_string(), "aborted");
    }
}
