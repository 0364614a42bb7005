//! Version identity types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit identifier for one version of a path's content.
///
/// Random for append-without-ref; supplied by the client for Create and
/// Replace stream refs. Renders in canonical hex-dashed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for VersionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The two resource kinds a path can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Columnar append-only store of batched records.
    Projection,
    /// Opaque byte sequence with a mimetype.
    Blob,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Projection => write!(f, "projection"),
            ResourceType::Blob => write!(f, "blob"),
        }
    }
}

/// One row of a path's version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: VersionId,
    pub kind: ResourceType,
    pub created_at: DateTime<Utc>,
}

/// Which version of a path a read resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// The head version, if one is set.
    Current,
    /// A specific version by id, whether or not it is the head.
    Archived(VersionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_round_trip() {
        let id = VersionId::random();
        let parsed: VersionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_resource_type_serde() {
        assert_eq!(
            serde_json::to_string(&ResourceType::Projection).unwrap(),
            "\"projection\""
        );
        assert_eq!(serde_json::to_string(&ResourceType::Blob).unwrap(), "\"blob\"");
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = VersionEntry {
            id: VersionId::random(),
            kind: ResourceType::Blob,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: VersionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
