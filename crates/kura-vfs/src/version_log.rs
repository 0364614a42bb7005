//! Durable per-path version log.
//!
//! An append-only file of framed records, one per version transition.
//! Each frame is `[len: u32 LE][crc32: u32 LE][payload]` with a JSON
//! payload, so a torn tail is detected by length or checksum and dropped
//! on open. Every mutator fsyncs before returning: once a caller sees
//! `Ok`, the transition survives a crash.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use kura_types::{ResourceError, ResourceType, VersionEntry, VersionId};

/// File name of the log inside a path directory.
pub const VERSION_LOG_FILE: &str = "version.log";

const FRAME_HEADER_LEN: usize = 8;

/// Errors from the version-log layer.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log io: {0}")]
    Io(String),
    #[error("corrupt log record: {0}")]
    Corrupt(String),
    #[error("unknown version {0}")]
    UnknownVersion(VersionId),
    #[error("version {0} is not completed")]
    NotCompleted(VersionId),
    #[error("version {id} already recorded as {existing}, not {requested}")]
    KindConflict {
        id: VersionId,
        existing: ResourceType,
        requested: ResourceType,
    },
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}

impl From<LogError> for ResourceError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io(msg) => ResourceError::Io(msg),
            LogError::Corrupt(msg) => ResourceError::Corrupt(msg),
            LogError::UnknownVersion(id) => ResourceError::NotFound(format!("version {id}")),
            LogError::NotCompleted(id) => {
                ResourceError::Corrupt(format!("version {id} is not completed"))
            }
            LogError::KindConflict { id, existing, requested } => {
                ResourceError::IllegalWriteRequest(format!(
                    "version {id} already recorded as {existing}, not {requested}"
                ))
            }
        }
    }
}

/// One durable version transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogRecord {
    VersionAdded(VersionEntry),
    VersionCompleted { id: VersionId },
    HeadSet { id: VersionId },
    HeadCleared,
}

/// Replayed in-memory view of a log: entry sequence plus derived indices.
#[derive(Debug, Clone, Default)]
struct LogState {
    entries: Vec<VersionEntry>,
    index: HashMap<VersionId, usize>,
    completed: HashSet<VersionId>,
    head: Option<VersionId>,
}

impl LogState {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::VersionAdded(entry) => {
                if !self.index.contains_key(&entry.id) {
                    self.index.insert(entry.id, self.entries.len());
                    self.entries.push(entry);
                }
            }
            LogRecord::VersionCompleted { id } => {
                if self.index.contains_key(&id) {
                    self.completed.insert(id);
                } else {
                    warn!(version = %id, "completion record for unknown version, skipped");
                }
            }
            LogRecord::HeadSet { id } => {
                if self.completed.contains(&id) {
                    self.head = Some(id);
                } else {
                    warn!(version = %id, "head record for uncompleted version, skipped");
                }
            }
            LogRecord::HeadCleared => {
                self.head = None;
            }
        }
    }

    fn find(&self, id: VersionId) -> Option<&VersionEntry> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    fn current(&self) -> Option<&VersionEntry> {
        self.head.and_then(|id| self.find(id))
    }
}

/// Decode frames from `bytes`, returning the records of the valid prefix
/// and its byte length. Anything past the returned length is a torn or
/// corrupt tail.
fn decode_frames(bytes: &[u8]) -> (Vec<LogRecord>, usize) {
    let mut records = Vec::new();
    let mut pos = 0;
    while bytes.len() - pos >= FRAME_HEADER_LEN {
        let len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let expected_crc =
            u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]);
        let start = pos + FRAME_HEADER_LEN;
        let Some(payload) = bytes.get(start..start + len) else {
            break;
        };
        if crc32(payload) != expected_crc {
            break;
        }
        let Ok(record) = serde_json::from_slice::<LogRecord>(payload) else {
            break;
        };
        records.push(record);
        pos = start + len;
    }
    (records, pos)
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, LogError> {
    let payload = serde_json::to_vec(record).map_err(|e| LogError::Io(e.to_string()))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// The durable version log for one path.
///
/// Exclusively owned by that path's manager; mutators append a record and
/// fsync before returning. Queries are answered from the in-memory indices
/// rebuilt on open.
#[derive(Debug)]
pub struct VersionLog {
    state: LogState,
    file: File,
}

impl VersionLog {
    /// Open or create the log in `dir`, replaying existing records.
    ///
    /// A torn or checksum-failing tail is truncated to the last whole
    /// record; the number of bytes dropped is logged.
    pub async fn open(dir: &Path) -> Result<Self, LogError> {
        let path = dir.join(VERSION_LOG_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (records, valid_len) = decode_frames(&bytes);
        if valid_len < bytes.len() {
            warn!(
                log = %path.display(),
                dropped = bytes.len() - valid_len,
                kept = records.len(),
                "truncating torn version log tail"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(valid_len as u64).await?;
            file.sync_all().await?;
        }

        let mut state = LogState::default();
        for record in records {
            state.apply(record);
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { state, file })
    }

    /// The entry for `id`, if recorded.
    pub fn find(&self, id: VersionId) -> Option<&VersionEntry> {
        self.state.find(id)
    }

    /// Has `id` been completed?
    pub fn is_completed(&self, id: VersionId) -> bool {
        self.state.completed.contains(&id)
    }

    /// The head entry, if a head is set.
    pub fn current(&self) -> Option<&VersionEntry> {
        self.state.current()
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> &[VersionEntry] {
        &self.state.entries
    }

    /// Record a new version. Idempotent on the id; recording the same id
    /// with a different resource kind is a conflict.
    pub async fn add_version(&mut self, entry: VersionEntry) -> Result<(), LogError> {
        if let Some(existing) = self.state.find(entry.id) {
            if existing.kind == entry.kind {
                return Ok(());
            }
            return Err(LogError::KindConflict {
                id: entry.id,
                existing: existing.kind,
                requested: entry.kind,
            });
        }
        self.append(LogRecord::VersionAdded(entry)).await
    }

    /// Mark `id` complete. Errors on an unknown id, no-ops when already
    /// complete.
    pub async fn complete_version(&mut self, id: VersionId) -> Result<(), LogError> {
        if self.state.find(id).is_none() {
            return Err(LogError::UnknownVersion(id));
        }
        if self.state.completed.contains(&id) {
            return Ok(());
        }
        self.append(LogRecord::VersionCompleted { id }).await
    }

    /// Point the head at `id`, which must already be completed.
    pub async fn set_head(&mut self, id: VersionId) -> Result<(), LogError> {
        if !self.state.completed.contains(&id) {
            return Err(LogError::NotCompleted(id));
        }
        if self.state.head == Some(id) {
            return Ok(());
        }
        self.append(LogRecord::HeadSet { id }).await
    }

    /// Clear the head. Idempotent.
    pub async fn clear_head(&mut self) -> Result<(), LogError> {
        if self.state.head.is_none() {
            return Ok(());
        }
        self.append(LogRecord::HeadCleared).await
    }

    /// Flush and release the file handle.
    pub async fn close(mut self) -> Result<(), LogError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    async fn append(&mut self, record: LogRecord) -> Result<(), LogError> {
        let frame = encode_frame(&record)?;
        self.file.write_all(&frame).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.state.apply(record);
        Ok(())
    }
}

/// Read-only view of a path's log, for discovery.
///
/// Parses whatever valid prefix exists without taking the write handle or
/// truncating; safe to run concurrently with the owning manager because
/// frames are only ever appended.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    state: LogState,
}

impl LogSnapshot {
    /// Load the log under `dir`, or `None` if no log file exists.
    pub async fn load(dir: &Path) -> Result<Option<Self>, LogError> {
        let path = dir.join(VERSION_LOG_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (records, _) = decode_frames(&bytes);
        let mut state = LogState::default();
        for record in records {
            state.apply(record);
        }
        Ok(Some(Self { state }))
    }

    pub fn current(&self) -> Option<&VersionEntry> {
        self.state.current()
    }

    pub fn find(&self, id: VersionId) -> Option<&VersionEntry> {
        self.state.find(id)
    }

    pub fn is_completed(&self, id: VersionId) -> bool {
        self.state.completed.contains(&id)
    }
}

/// IEEE crc32 (reflected, poly 0xEDB88320) over `data`.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}
