//! Upload work items and scratch slot identifiers.

use crate::hash::AssetFingerprint;
use crate::mime::file_type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Token naming the temporary storage slot of one upload attempt.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScratchId(Uuid);

impl ScratchId {
    /// Generate a fresh scratch id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key of the scratch object under the given prefix.
    pub fn key(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.to_string()
        } else {
            format!("{prefix}/{self}")
        }
    }
}

impl Default for ScratchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScratchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScratchId({})", self.0.simple())
    }
}

impl fmt::Display for ScratchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// An absolute URI bytes are copied from.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceUri(Url);

impl SourceUri {
    /// Validate a caller-supplied source address.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(crate::Error::InvalidSource("asset URL missing".to_string()));
        }
        let url = Url::parse(raw)
            .map_err(|_| crate::Error::InvalidSource("asset URL is not valid".to_string()))?;
        if url.cannot_be_a_base() {
            return Err(crate::Error::InvalidSource(
                "asset URL is not valid".to_string(),
            ));
        }
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for SourceUri {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<SourceUri> for String {
    fn from(value: SourceUri) -> Self {
        value.0.into()
    }
}

impl fmt::Debug for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Signed URLs carry credentials in the query string.
        let mut redacted = self.0.clone();
        if redacted.query().is_some() {
            redacted.set_query(Some("<redacted>"));
        }
        write!(f, "SourceUri({redacted})")
    }
}

impl fmt::Display for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.0.scheme(), self.0.host_str().unwrap_or(""), self.0.path())
    }
}

/// Result of copying and fingerprinting a remote blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedBlob {
    pub fingerprint: AssetFingerprint,
    pub mime_type: String,
    pub size: u64,
}

/// State of one upload attempt.
#[derive(Clone, Debug)]
pub struct UploadWorkItem {
    pub source: SourceUri,
    pub file_name: String,
    /// Caller-supplied type. Reported alongside, never used for resolution.
    pub declared_mime_type: Option<String>,
    pub scratch_id: ScratchId,
    pub tags: BTreeSet<String>,
    copied: Option<CopiedBlob>,
}

impl UploadWorkItem {
    /// Create a work item with a fresh scratch slot.
    pub fn new(source: SourceUri, file_name: impl Into<String>) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            declared_mime_type: None,
            scratch_id: ScratchId::new(),
            tags: BTreeSet::new(),
            copied: None,
        }
    }

    pub fn with_declared_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.declared_mime_type = Some(mime_type.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Add the `type/<extension>` tag derived from the file name.
    pub fn enrich_type_tag(&mut self) {
        if let Some(ext) = file_type(&self.file_name) {
            self.tags.insert(format!("type/{ext}"));
        }
    }

    /// Record the copy result. Later calls are ignored; the result is immutable.
    pub fn set_copied(&mut self, blob: CopiedBlob) {
        if self.copied.is_none() {
            self.copied = Some(blob);
        }
    }

    pub fn copied(&self) -> Option<&CopiedBlob> {
        self.copied.as_ref()
    }
}
