//! Path router: demultiplexes requests onto per-path managers and bounds
//! how many are live at once.
//!
//! The router is itself a single actor. It alone owns the manager map and
//! the LRU of live paths, so no locking is needed: a path access touches
//! the LRU, an eviction sends the evicted manager a quiesce signal, and a
//! manager that reports itself idle is collapsed once the router confirms
//! the report didn't race with an in-flight send.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use kura_types::{
    EventMessage, PathMetadata, ResourceError, ResourceResult, Version, VersionEntry, VfsPath,
    WritePermission,
};

use crate::clock::Clock;
use crate::config::VfsConfig;
use crate::jobs::JobTracker;
use crate::manager::{IngestBundle, ManagerDeps, ManagerHandle, PathCommand, PathManager};
use crate::path_util;
use crate::perms::PermissionsFinder;
use crate::resource::{Resource, ResourceBuilder};

const ROUTER_MAILBOX: usize = 256;

/// Requests the router accepts, from the facade and from its managers.
pub(crate) enum RouterCommand {
    Ingest {
        messages: Vec<(u64, EventMessage)>,
        reply: Option<oneshot::Sender<Vec<ResourceResult<()>>>>,
    },
    Read {
        path: VfsPath,
        version: Version,
        reply: oneshot::Sender<ResourceResult<Resource>>,
    },
    CurrentVersion {
        path: VfsPath,
        reply: oneshot::Sender<ResourceResult<Option<VersionEntry>>>,
    },
    FindChildren {
        path: VfsPath,
        reply: oneshot::Sender<ResourceResult<Vec<PathMetadata>>>,
    },
    FindMetadata {
        path: VfsPath,
        reply: oneshot::Sender<ResourceResult<PathMetadata>>,
    },
    /// A manager has been inactive past its quiescence timeout.
    ManagerIdle { path: VfsPath, processed: u64 },
    Shutdown { done: oneshot::Sender<()> },
}

struct ManagerSlot {
    handle: ManagerHandle,
    /// Counted commands delivered to this manager; compared against the
    /// `processed` figure in idle notices to detect stale ones.
    sent: u64,
}

pub(crate) struct PathRouter {
    config: Arc<VfsConfig>,
    deps: ManagerDeps,
    perms: Arc<dyn PermissionsFinder>,
    managers: HashMap<VfsPath, ManagerSlot>,
    lru: LruCache<VfsPath, ()>,
    /// Handed to managers so they can address the router back
    /// (idle notices, cache-invalidation sends).
    self_tx: mpsc::Sender<RouterCommand>,
}

/// Start the router task and return its mailbox.
pub(crate) fn spawn(
    config: Arc<VfsConfig>,
    perms: Arc<dyn PermissionsFinder>,
    jobs: Arc<dyn JobTracker>,
    clock: Arc<dyn Clock>,
) -> mpsc::Sender<RouterCommand> {
    let (tx, rx) = mpsc::channel(ROUTER_MAILBOX);
    let deps = ManagerDeps {
        builder: ResourceBuilder::new(config.blob_chunk_size, clock.clone()),
        clock,
        jobs,
        config: config.clone(),
    };
    let capacity =
        NonZeroUsize::new(config.max_open_paths).unwrap_or(NonZeroUsize::MIN);
    let router = PathRouter {
        config,
        deps,
        perms,
        managers: HashMap::new(),
        lru: LruCache::new(capacity),
        self_tx: tx.clone(),
    };
    tokio::spawn(router.run(rx));
    tx
}

impl PathRouter {
    async fn run(mut self, mut rx: mpsc::Receiver<RouterCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RouterCommand::Ingest { messages, reply } => {
                    self.handle_ingest(messages, reply).await;
                }
                RouterCommand::Read { path, version, reply } => {
                    if let Err(e) = self.deliver(&path, PathCommand::Read { version, reply }).await {
                        debug!(path = %path, error = %e, "read not delivered");
                    }
                }
                RouterCommand::CurrentVersion { path, reply } => {
                    if let Err(e) = self
                        .deliver(&path, PathCommand::CurrentVersion { reply })
                        .await
                    {
                        debug!(path = %path, error = %e, "current-version not delivered");
                    }
                }
                RouterCommand::FindChildren { path, reply } => {
                    let _ = reply.send(path_util::find_children(&self.config.base_dir, &path).await);
                }
                RouterCommand::FindMetadata { path, reply } => {
                    let _ = reply.send(path_util::find_metadata(&self.config.base_dir, &path).await);
                }
                RouterCommand::ManagerIdle { path, processed } => {
                    self.handle_idle(path, processed).await;
                }
                RouterCommand::Shutdown { done } => {
                    self.shutdown().await;
                    let _ = done.send(());
                    return;
                }
            }
        }
    }

    /// Resolve (or create) the manager for `path`, touch the LRU, and
    /// deliver one counted command to it.
    ///
    /// On failure the command's reply channel is answered before the
    /// error returns, so callers only need to log.
    async fn deliver(&mut self, path: &VfsPath, command: PathCommand) -> ResourceResult<()> {
        if let Err(e) = self.ensure_manager(path).await {
            fail_command(command, e.clone());
            return Err(e);
        }
        let slot = match self.managers.get_mut(path) {
            Some(slot) => slot,
            None => {
                let e = ResourceError::Io(format!("manager for {path} vanished"));
                fail_command(command, e.clone());
                return Err(e);
            }
        };
        slot.sent += 1;
        if let Err(send_error) = slot.handle.tx.send(command).await {
            let e = ResourceError::Io(format!("manager for {path} stopped"));
            fail_command(send_error.0, e.clone());
            self.managers.remove(path);
            self.lru.pop(path);
            return Err(e);
        }
        Ok(())
    }

    /// Materialize the manager on first use and record the path access in
    /// the LRU, quiescing whatever the access evicts.
    async fn ensure_manager(&mut self, path: &VfsPath) -> ResourceResult<()> {
        if !self.managers.contains_key(path) {
            let handle =
                PathManager::spawn(path.clone(), self.deps.clone(), self.self_tx.clone()).await?;
            self.managers.insert(path.clone(), ManagerSlot { handle, sent: 0 });
        }
        if let Some((evicted, ())) = self.lru.push(path.clone(), ()) {
            if evicted != *path {
                if let Some(slot) = self.managers.get(&evicted) {
                    if slot.handle.tx.try_send(PathCommand::Quiesce).is_err() {
                        debug!(path = %evicted, "evicted manager busy, quiesce skipped");
                    }
                }
            }
        }
        Ok(())
    }

    /// Group a batch by path, resolve permissions once per distinct api
    /// key, and hand each path its bundle. When the caller wants a reply,
    /// the per-path replies are aggregated off the router task.
    async fn handle_ingest(
        &mut self,
        messages: Vec<(u64, EventMessage)>,
        reply: Option<oneshot::Sender<Vec<ResourceResult<()>>>>,
    ) {
        let mut groups: HashMap<VfsPath, Vec<(u64, EventMessage)>> = HashMap::new();
        for (offset, message) in messages {
            groups
                .entry(message.path().clone())
                .or_default()
                .push((offset, message));
        }

        let mut perms: HashMap<String, Vec<WritePermission>> = HashMap::new();
        for group in groups.values() {
            for (_, message) in group {
                let key = message.api_key();
                if perms.contains_key(key) {
                    continue;
                }
                let granted = match self.perms.write_permissions(key).await {
                    Ok(granted) => granted,
                    Err(e) => {
                        warn!(error = %e, "permission lookup failed, treating key as unprivileged");
                        Vec::new()
                    }
                };
                perms.insert(key.to_string(), granted);
            }
        }

        let mut immediate: Vec<ResourceResult<()>> = Vec::new();
        let mut pending = Vec::new();
        for (path, group) in groups {
            let count = group.len();
            let bundle = IngestBundle {
                messages: group,
                perms: perms.clone(),
            };
            let (group_reply, group_rx) = if reply.is_some() {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            match self
                .deliver(&path, PathCommand::Ingest { bundle, reply: group_reply })
                .await
            {
                Ok(()) => {
                    if let Some(rx) = group_rx {
                        pending.push((count, rx));
                    }
                }
                Err(e) => {
                    immediate.extend(std::iter::repeat_with(|| Err(e.clone())).take(count));
                }
            }
        }

        if let Some(reply) = reply {
            tokio::spawn(async move {
                let mut all = immediate;
                for (count, rx) in pending {
                    match rx.await {
                        Ok(results) => all.extend(results),
                        Err(_) => all.extend(
                            std::iter::repeat_with(|| {
                                Err(ResourceError::Io(
                                    "manager stopped before replying".to_string(),
                                ))
                            })
                            .take(count),
                        ),
                    }
                }
                let _ = reply.send(all);
            });
        }
    }

    /// Collapse an idle manager, unless the notice raced with a send.
    async fn handle_idle(&mut self, path: VfsPath, processed: u64) {
        match self.managers.get(&path) {
            Some(slot) if slot.sent == processed => {}
            Some(_) => {
                debug!(path = %path, "stale idle notice ignored");
                return;
            }
            None => return,
        }
        debug!(path = %path, "collapsing idle manager");
        if let Some(slot) = self.managers.remove(&path) {
            self.lru.pop(&path);
            let (done_tx, done_rx) = oneshot::channel();
            if slot.handle.tx.send(PathCommand::Shutdown { done: done_tx }).await.is_ok() {
                // Reap off the router task; routing never waits on a close.
                tokio::spawn(async move {
                    let _ = done_rx.await;
                });
            }
        }
    }

    async fn shutdown(&mut self) {
        let mut waits = Vec::new();
        for (path, slot) in self.managers.drain() {
            let (done_tx, done_rx) = oneshot::channel();
            if slot.handle.tx.send(PathCommand::Shutdown { done: done_tx }).await.is_ok() {
                waits.push((path, done_rx));
            }
        }
        for (path, done) in waits {
            if tokio::time::timeout(self.config.shutdown_timeout, done).await.is_err() {
                warn!(path = %path, "manager shutdown timed out");
            }
        }
    }
}

/// Answer a command's reply channel with `error` when the command never
/// reached a manager.
fn fail_command(command: PathCommand, error: ResourceError) {
    match command {
        PathCommand::Read { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        PathCommand::CurrentVersion { reply } => {
            let _ = reply.send(Err(error));
        }
        PathCommand::Ingest { bundle, reply } => {
            if let Some(reply) = reply {
                let count = bundle.messages.len();
                let _ = reply.send(
                    std::iter::repeat_with(|| Err(error.clone())).take(count).collect(),
                );
            }
        }
        PathCommand::Quiesce | PathCommand::Shutdown { .. } => {}
    }
}
