//! Ingest event messages and stream references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::authority::Authorities;
use crate::path::VfsPath;
use crate::version::VersionId;

/// How an ingest message relates to a path's version stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StreamRef {
    /// Establish a new version, optionally closing it in this message.
    Create { id: VersionId, terminal: bool },
    /// Supersede any current head with this new version.
    Replace { id: VersionId, terminal: bool },
    /// Append to the current head version, or start one if none exists.
    Append,
}

impl StreamRef {
    /// The client-supplied version id, if this ref carries one.
    pub fn version_id(&self) -> Option<VersionId> {
        match self {
            StreamRef::Create { id, .. } | StreamRef::Replace { id, .. } => Some(*id),
            StreamRef::Append => None,
        }
    }
}

/// A batch of records destined for a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMessage {
    pub api_key: String,
    pub path: VfsPath,
    pub write_as: Authorities,
    pub data: Vec<JsonValue>,
    pub job_id: Option<String>,
    pub stream_ref: StreamRef,
}

/// Opaque file content carried by a store-file message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A binary blob destined for a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFileMessage {
    pub api_key: String,
    pub path: VfsPath,
    pub write_as: Authorities,
    pub content: FileContent,
    pub job_id: Option<String>,
    pub stream_ref: StreamRef,
}

/// Clear a path's head so the current content becomes archive-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMessage {
    pub api_key: String,
    pub path: VfsPath,
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One ingest event, tagged with the path it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    Ingest(IngestMessage),
    StoreFile(StoreFileMessage),
    Archive(ArchiveMessage),
}

impl EventMessage {
    /// The path this message targets.
    pub fn path(&self) -> &VfsPath {
        match self {
            EventMessage::Ingest(m) => &m.path,
            EventMessage::StoreFile(m) => &m.path,
            EventMessage::Archive(m) => &m.path,
        }
    }

    /// The api key the message was submitted under.
    pub fn api_key(&self) -> &str {
        match self {
            EventMessage::Ingest(m) => &m.api_key,
            EventMessage::StoreFile(m) => &m.api_key,
            EventMessage::Archive(m) => &m.api_key,
        }
    }

    /// The job this message is tracked under, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EventMessage::Ingest(m) => m.job_id.as_deref(),
            EventMessage::StoreFile(m) => m.job_id.as_deref(),
            EventMessage::Archive(m) => m.job_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_ref_version_id() {
        let id = VersionId::random();
        assert_eq!(
            StreamRef::Create { id, terminal: true }.version_id(),
            Some(id)
        );
        assert_eq!(StreamRef::Append.version_id(), None);
    }

    #[test]
    fn test_event_message_serde_round_trip() {
        let msg = EventMessage::Ingest(IngestMessage {
            api_key: "key".into(),
            path: "/a/b".parse().unwrap(),
            write_as: Authorities::single("acct"),
            data: vec![json!({"x": 1})],
            job_id: Some("job-1".into()),
            stream_ref: StreamRef::Append,
        });
        let encoded = serde_json::to_string(&msg).unwrap();
        let back: EventMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.path().to_string(), "/a/b");
        assert_eq!(back.job_id(), Some("job-1"));
    }
}
