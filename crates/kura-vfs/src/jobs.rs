//! Job tracking seam.
//!
//! Ingest messages may carry a job id; the manager reports each tracked
//! message's outcome here after it settles. Tracker failures never affect
//! the write path.

use async_trait::async_trait;

use kura_types::{ResourceResult, VfsPath};

/// Sink for per-message ingest outcomes.
#[async_trait]
pub trait JobTracker: Send + Sync {
    async fn record(
        &self,
        job_id: &str,
        path: &VfsPath,
        outcome: &ResourceResult<()>,
    ) -> ResourceResult<()>;
}

/// Discards every report.
#[derive(Debug, Default)]
pub struct NoopJobTracker;

#[async_trait]
impl JobTracker for NoopJobTracker {
    async fn record(
        &self,
        _job_id: &str,
        _path: &VfsPath,
        _outcome: &ResourceResult<()>,
    ) -> ResourceResult<()> {
        Ok(())
    }
}
