//! Projection store seam and the local append-only engine.
//!
//! The VFS treats the projection engine as opaque: anything that can
//! append a batch, hand back an immutable snapshot, flush, and close.
//! [`LocalProjectionStore`] is the shipped engine — batches persisted as
//! NDJSON lines with offset-based replay dedup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use kura_types::{Batch, ResourceError, ResourceResult};

/// Data file name inside a projection version directory.
pub const BATCHES_FILE: &str = "batches.ndjson";

/// An append-only batched record store.
///
/// Appends at an already-present offset are dropped, which is what makes
/// message redelivery idempotent at this layer. Snapshots returned by
/// `scan` are never mutated by later appends.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Durably append one batch. No-op if the batch's offset is present.
    async fn append(&self, batch: Batch) -> ResourceResult<()>;

    /// Immutable snapshot of all batches, in arrival order.
    async fn scan(&self) -> Vec<Batch>;

    /// Total number of records across all batches.
    async fn record_count(&self) -> u64;

    /// Flush and release file handles, keeping the store reopenable.
    async fn quiesce(&self) -> ResourceResult<()>;

    /// Flush and release everything.
    async fn close(&self) -> ResourceResult<()>;
}

#[derive(Debug, Default)]
struct StoreInner {
    file: Option<File>,
    batches: Vec<Batch>,
    offsets: HashSet<u64>,
}

/// NDJSON-backed projection store in one version directory.
#[derive(Debug)]
pub struct LocalProjectionStore {
    path: PathBuf,
    inner: tokio::sync::Mutex<StoreInner>,
}

impl LocalProjectionStore {
    /// Initialize an empty store in `dir`.
    pub async fn create(dir: &Path) -> ResourceResult<Self> {
        let path = dir.join(BATCHES_FILE);
        let file = File::create(&path).await?;
        file.sync_all().await?;
        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(StoreInner::default()),
        })
    }

    /// Open an existing store, replaying its batches.
    ///
    /// A torn trailing line (crash mid-append) is dropped and the file
    /// truncated back to the last whole batch.
    pub async fn open(dir: &Path) -> ResourceResult<Self> {
        let path = dir.join(BATCHES_FILE);
        let bytes = tokio::fs::read(&path).await?;

        let mut batches: Vec<Batch> = Vec::new();
        let mut offsets = HashSet::new();
        let mut valid_len = 0;
        for line in bytes.split_inclusive(|&b| b == b'\n') {
            if !line.ends_with(b"\n") {
                break;
            }
            let Ok(batch) = serde_json::from_slice::<Batch>(line) else {
                break;
            };
            offsets.insert(batch.offset);
            batches.push(batch);
            valid_len += line.len();
        }
        if valid_len < bytes.len() {
            warn!(
                store = %path.display(),
                dropped = bytes.len() - valid_len,
                "truncating torn projection tail"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(valid_len as u64).await?;
            file.sync_all().await?;
        }

        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(StoreInner {
                file: None,
                batches,
                offsets,
            }),
        })
    }

    /// Does `dir` hold a store?
    pub async fn exists(dir: &Path) -> bool {
        tokio::fs::try_exists(dir.join(BATCHES_FILE)).await.unwrap_or(false)
    }
}

#[async_trait]
impl ProjectionStore for LocalProjectionStore {
    async fn append(&self, batch: Batch) -> ResourceResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.offsets.contains(&batch.offset) {
            debug!(offset = batch.offset, "duplicate batch offset, skipped");
            return Ok(());
        }

        let mut line = serde_json::to_vec(&batch)
            .map_err(|e| ResourceError::Io(e.to_string()))?;
        line.push(b'\n');

        if inner.file.is_none() {
            inner.file = Some(OpenOptions::new().append(true).open(&self.path).await?);
        }
        let file = inner.file.as_mut().ok_or_else(|| {
            ResourceError::Io("projection store file handle missing".to_string())
        })?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        inner.offsets.insert(batch.offset);
        inner.batches.push(batch);
        Ok(())
    }

    async fn scan(&self) -> Vec<Batch> {
        self.inner.lock().await.batches.clone()
    }

    async fn record_count(&self) -> u64 {
        self.inner
            .lock()
            .await
            .batches
            .iter()
            .map(|b| b.len() as u64)
            .sum()
    }

    async fn quiesce(&self) -> ResourceResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.file.take() {
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn close(&self) -> ResourceResult<()> {
        self.quiesce().await
    }
}
