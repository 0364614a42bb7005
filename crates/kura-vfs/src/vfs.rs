//! Client-facing facade.
//!
//! A `Vfs` owns a running router; every operation is a message to it.
//! Reads and metadata queries carry the `projection_read_timeout`
//! deadline, synchronous writes the `slice_ingest_timeout` — on expiry
//! the caller sees a timeout error while the underlying operation runs to
//! completion and its late reply is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use kura_types::{
    EventMessage, PathMetadata, ResourceError, ResourceResult, Version, VersionEntry, VfsPath,
};

use crate::clock::{Clock, SystemClock};
use crate::config::VfsConfig;
use crate::jobs::{JobTracker, NoopJobTracker};
use crate::perms::PermissionsFinder;
use crate::resource::Resource;
use crate::router::{self, RouterCommand};

/// Handle to a running VFS.
///
/// Cheap to clone; all clones speak to the same router. Call
/// [`Vfs::shutdown`] to close every live path manager before dropping the
/// last handle.
#[derive(Clone)]
pub struct Vfs {
    tx: mpsc::Sender<RouterCommand>,
    config: Arc<VfsConfig>,
}

impl Vfs {
    /// Start a VFS with the system clock and no job tracking.
    pub async fn open(
        config: VfsConfig,
        perms: Arc<dyn PermissionsFinder>,
    ) -> ResourceResult<Self> {
        Self::open_with(config, perms, Arc::new(NoopJobTracker), Arc::new(SystemClock)).await
    }

    /// Start a VFS with explicit collaborator implementations.
    pub async fn open_with(
        config: VfsConfig,
        perms: Arc<dyn PermissionsFinder>,
        jobs: Arc<dyn JobTracker>,
        clock: Arc<dyn Clock>,
    ) -> ResourceResult<Self> {
        tokio::fs::create_dir_all(&config.base_dir).await?;
        let config = Arc::new(config);
        let tx = router::spawn(config.clone(), perms, jobs, clock);
        Ok(Self { tx, config })
    }

    /// Enqueue a batch of event messages and return once accepted.
    ///
    /// Fire-and-forget: per-message failures are applied and logged on the
    /// manager side but not reported back.
    pub async fn write_all(&self, messages: Vec<(u64, EventMessage)>) -> ResourceResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.tx
            .send(RouterCommand::Ingest { messages, reply: None })
            .await
            .map_err(|_| ResourceError::Io("vfs is shut down".to_string()))
    }

    /// Apply a batch and wait for every message to settle.
    ///
    /// Messages are grouped by path and each path's slice is awaited
    /// independently; every failure is preserved and the whole batch
    /// fails with the folded error.
    pub async fn write_all_sync(&self, messages: Vec<(u64, EventMessage)>) -> ResourceResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut groups: HashMap<VfsPath, Vec<(u64, EventMessage)>> = HashMap::new();
        for (offset, message) in messages {
            groups
                .entry(message.path().clone())
                .or_default()
                .push((offset, message));
        }

        let mut pending = Vec::new();
        for (path, group) in groups {
            let (reply, rx) = oneshot::channel();
            self.tx
                .send(RouterCommand::Ingest {
                    messages: group,
                    reply: Some(reply),
                })
                .await
                .map_err(|_| ResourceError::Io("vfs is shut down".to_string()))?;
            pending.push((path, rx));
        }

        let deadline = self.config.slice_ingest_timeout;
        let waits = pending.into_iter().map(|(path, rx)| async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(results)) => results.into_iter().filter_map(Result::err).collect(),
                Ok(Err(_)) => vec![ResourceError::Io(format!("no reply for writes to {path}"))],
                Err(_) => {
                    debug!(path = %path, "ingest slice deadline exceeded, late reply discarded");
                    vec![ResourceError::Timeout(format!("ingest into {path}"))]
                }
            }
        });

        let mut errors: Vec<ResourceError> = Vec::new();
        for mut slice_errors in futures::future::join_all(waits).await {
            errors.append(&mut slice_errors);
        }
        match ResourceError::compound(errors) {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Resolve a path and version to a resource handle.
    pub async fn read_resource(
        &self,
        path: &VfsPath,
        version: Version,
    ) -> ResourceResult<Resource> {
        let path = path.clone();
        self.ask(self.config.projection_read_timeout, move |reply| {
            RouterCommand::Read { path, version, reply }
        })
        .await?
    }

    /// The head entry of `path`, if one is set.
    pub async fn current_version(&self, path: &VfsPath) -> ResourceResult<Option<VersionEntry>> {
        let path = path.clone();
        self.ask(self.config.projection_read_timeout, move |reply| {
            RouterCommand::CurrentVersion { path, reply }
        })
        .await?
    }

    /// One-level child listing, relative to `path`.
    pub async fn find_direct_children(
        &self,
        path: &VfsPath,
    ) -> ResourceResult<Vec<PathMetadata>> {
        let path = path.clone();
        self.ask(self.config.projection_read_timeout, move |reply| {
            RouterCommand::FindChildren { path, reply }
        })
        .await?
    }

    /// Metadata for exactly one path node.
    pub async fn find_path_metadata(&self, path: &VfsPath) -> ResourceResult<PathMetadata> {
        let path = path.clone();
        self.ask(self.config.projection_read_timeout, move |reply| {
            RouterCommand::FindMetadata { path, reply }
        })
        .await?
    }

    /// Close every live manager and stop the router.
    pub async fn shutdown(self) -> ResourceResult<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(RouterCommand::Shutdown { done })
            .await
            .map_err(|_| ResourceError::Io("vfs is already shut down".to_string()))?;
        rx.await
            .map_err(|_| ResourceError::Io("router stopped before confirming shutdown".to_string()))
    }

    async fn ask<T>(
        &self,
        deadline: Duration,
        build: impl FnOnce(oneshot::Sender<T>) -> RouterCommand,
    ) -> ResourceResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ResourceError::Io("vfs is shut down".to_string()))?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ResourceError::Io("reply channel closed".to_string())),
            Err(_) => {
                debug!("request deadline exceeded, late reply will be discarded");
                Err(ResourceError::Timeout("request deadline exceeded".to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("base_dir", &self.config.base_dir)
            .finish()
    }
}
