//! Resource and path metadata, and the projection batch type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::authority::Authorities;
use crate::path::VfsPath;

/// A batch of records at a message offset, the unit of projection append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub offset: u64,
    pub values: Vec<JsonValue>,
}

impl Batch {
    pub fn new(offset: u64, values: Vec<JsonValue>) -> Self {
        Self { offset, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Sidecar metadata persisted next to a blob's data file.
///
/// Serialized as JSON with the on-disk key spelling (`mimeType`, `size`,
/// `created`, `authorities`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub mime_type: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub authorities: Authorities,
}

/// What kind of node a path currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathNodeKind {
    /// A container with no current data version of its own.
    Directory,
    /// The current version holds a projection.
    Projection,
    /// The current version holds a blob.
    Blob,
}

/// Discovery result for one path node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathMetadata {
    pub path: VfsPath,
    pub kind: PathNodeKind,
}

impl PathMetadata {
    pub fn new(path: VfsPath, kind: PathNodeKind) -> Self {
        Self { path, kind }
    }
}
