//! Remote-copy asset ingestion for Ferry.
//!
//! An upload copies a remote blob server-side into a scratch slot, computes
//! its fingerprint, short-circuits on duplicates and otherwise commits the
//! asset and stores the file under its permanent versioned key.

pub mod coordinator;
pub mod error;
pub mod request;
pub mod traits;
pub mod uploader;

pub use coordinator::{DuplicateCheckCoordinator, IngestOutcome, resolve_remote_copy};
pub use error::{IngestError, IngestResult};
pub use request::{AssetCommand, AssetFile, AssetUpload, UploadMode, UploadRequest};
pub use traits::{
    AssetCommandExecutor, AssetEnricher, AssetQuery, BasicEnricher, CommandResult, EnrichedAsset,
};
pub use uploader::RemoteCopyUploader;
