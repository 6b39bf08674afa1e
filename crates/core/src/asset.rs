//! Asset identifiers and the externally owned asset record.

use crate::hash::AssetFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of a host domain object (app, asset, folder).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a caller-supplied identifier.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidId("identifier is empty".to_string()));
        }
        if trimmed.contains('/') {
            return Err(crate::Error::InvalidId(format!(
                "identifier must not contain '/': {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Identifier of an aggregate owned by `parent`, as the host combines them.
    pub fn combine(parent: &DomainId, child: &DomainId) -> Self {
        Self(format!("{}--{}", parent.0, child.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({})", self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An identifier paired with its human-readable name (e.g. an app).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedId {
    pub id: DomainId,
    pub name: String,
}

impl NamedId {
    pub fn new(id: DomainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for NamedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.id, self.name)
    }
}

/// Scope an asset query or command runs in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetScope {
    /// The app owning the assets.
    pub app: NamedId,
    /// Actor issuing the request, if known.
    pub actor: Option<String>,
}

impl AssetScope {
    pub fn new(app: NamedId) -> Self {
        Self { app, actor: None }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Snapshot of an asset aggregate as seen by this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Owning app.
    pub app_id: NamedId,
    /// Asset identifier within the app.
    pub id: DomainId,
    /// Optional parent folder.
    pub parent_id: Option<DomainId>,
    /// Aggregate version, incremented on every change.
    pub version: i64,
    /// Version of the stored file, incremented on every file replacement.
    pub file_version: i64,
    pub file_name: String,
    pub file_hash: AssetFingerprint,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
}

impl AssetRecord {
    /// Combined aggregate identifier (app + asset).
    pub fn aggregate_id(&self) -> DomainId {
        DomainId::combine(&self.app_id.id, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_id_parse_rejects_empty_and_slash() {
        assert!(DomainId::parse("  ").is_err());
        assert!(DomainId::parse("a/b").is_err());
        assert_eq!(DomainId::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_domain_ids_are_unique() {
        assert_ne!(DomainId::new(), DomainId::new());
    }

    #[test]
    fn test_combine() {
        let app = DomainId::parse("app").unwrap();
        let asset = DomainId::parse("asset").unwrap();
        assert_eq!(DomainId::combine(&app, &asset).as_str(), "app--asset");
    }
}
