//! Hash types used to fingerprint ingested assets.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Encode as base64 string.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        checksum_hex(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Render a store-reported checksum as lowercase hex.
///
/// An absent checksum renders as the empty string so that the fingerprint
/// still covers name and length.
pub fn checksum_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deduplication key of an ingested file.
///
/// The fingerprint is the base64 SHA-256 of the store checksum (hex), the
/// file name and the byte length concatenated. Identical bytes uploaded
/// under a different name produce a different fingerprint.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetFingerprint(String);

impl AssetFingerprint {
    /// Compute the fingerprint from the store checksum, name and size.
    pub fn compute(checksum: Option<&[u8]>, file_name: &str, size: u64) -> Self {
        let checksum = checksum.map(checksum_hex).unwrap_or_default();
        let composite = format!("{checksum}{file_name}{size}");
        Self(ContentHash::compute(composite.as_bytes()).to_base64())
    }

    /// Wrap an already computed fingerprint, e.g. one read back from an index.
    pub fn from_encoded(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AssetFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetFingerprint({})", self.0)
    }
}

impl fmt::Display for AssetFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
