//! Core domain types and shared logic for Ferry.
//!
//! This crate defines the data model used across all other crates:
//! - Asset identifiers and the asset record snapshot
//! - Upload work items, scratch slots and copy sources
//! - Asset fingerprints
//! - MIME type resolution
//! - Application configuration

pub mod asset;
pub mod config;
pub mod error;
pub mod hash;
pub mod mime;
pub mod upload;

pub use asset::{AssetRecord, AssetScope, DomainId, NamedId};
pub use error::{Error, Result};
pub use hash::{AssetFingerprint, ContentHash, checksum_hex};
pub use mime::{BuiltinMimeTable, MapMimeTable, MimeTable, OCTET_STREAM, resolve_mime_type};
pub use upload::{CopiedBlob, ScratchId, SourceUri, UploadWorkItem};
