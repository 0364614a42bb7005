//! VFS configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::Vfs`] instance.
#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// Root directory for all stored paths.
    pub base_dir: PathBuf,
    /// Maximum number of concurrently live path managers. Accessing a path
    /// beyond this bound quiesces the least-recently-used manager.
    pub max_open_paths: usize,
    /// Inactivity window after which a manager flushes its projections and
    /// offers itself for collapse.
    pub quiescence_timeout: Duration,
    /// Upper bound on the time a manager is granted to close its resources.
    pub shutdown_timeout: Duration,
    /// Deadline for reads and metadata queries.
    pub projection_read_timeout: Duration,
    /// Deadline for one path's slice of a synchronous write batch.
    pub slice_ingest_timeout: Duration,
    /// Chunk size for streamed blob writes.
    pub blob_chunk_size: usize,
}

impl VfsConfig {
    /// Defaults for everything but the base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_open_paths: 256,
            quiescence_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            projection_read_timeout: Duration::from_secs(30),
            slice_ingest_timeout: Duration::from_secs(60),
            blob_chunk_size: 100 * 1024,
        }
    }
}
