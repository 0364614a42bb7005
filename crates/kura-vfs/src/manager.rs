//! Per-path manager: the single-writer authority for one logical path.
//!
//! One tokio task and one mailbox per live path. The manager owns the
//! path's version log and its open resources; messages are processed
//! strictly in arrival order, so no two writes to the same path ever
//! interleave. Replies are sent only after the message's side effects are
//! durable.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use kura_types::{
    ArchiveMessage, Authorities, Batch, EventMessage, FileContent, IngestMessage, ResourceError,
    ResourceResult, ResourceType, StoreFileMessage, StreamRef, Version, VersionEntry, VersionId,
    VfsPath, WritePermission,
};

use crate::clock::Clock;
use crate::config::VfsConfig;
use crate::jobs::JobTracker;
use crate::path_util;
use crate::perms::can_create;
use crate::resource::{Resource, ResourceBuilder, MIME_SCRIPT};
use crate::router::RouterCommand;
use crate::version_log::VersionLog;

/// Mailbox depth per manager; senders queue beyond this.
const MAILBOX_CAPACITY: usize = 64;

/// One path's slice of an ingest batch, with the permissions resolved for
/// every api key that appears in it.
#[derive(Debug)]
pub(crate) struct IngestBundle {
    pub messages: Vec<(u64, EventMessage)>,
    pub perms: HashMap<String, Vec<WritePermission>>,
}

/// Commands a manager accepts from the router.
pub(crate) enum PathCommand {
    Ingest {
        bundle: IngestBundle,
        reply: Option<oneshot::Sender<Vec<ResourceResult<()>>>>,
    },
    Read {
        version: Version,
        reply: oneshot::Sender<ResourceResult<Resource>>,
    },
    CurrentVersion {
        reply: oneshot::Sender<ResourceResult<Option<VersionEntry>>>,
    },
    /// Flush open projections; sent on LRU eviction. Not counted toward
    /// the processed total.
    Quiesce,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Dependencies shared by every manager.
#[derive(Clone)]
pub(crate) struct ManagerDeps {
    pub builder: ResourceBuilder,
    pub clock: Arc<dyn Clock>,
    pub jobs: Arc<dyn JobTracker>,
    pub config: Arc<VfsConfig>,
}

/// Sending half of a manager's mailbox.
#[derive(Clone)]
pub(crate) struct ManagerHandle {
    pub tx: mpsc::Sender<PathCommand>,
}

enum CreatePayload {
    Projection { seed: Batch },
    Blob { content: FileContent },
}

pub(crate) struct PathManager {
    path: VfsPath,
    dir: PathBuf,
    log: VersionLog,
    open_resources: HashMap<VersionId, Resource>,
    deps: ManagerDeps,
    router: mpsc::Sender<RouterCommand>,
    /// Count of counted commands handled, echoed in idle notices so the
    /// router can detect a notice that raced with an in-flight send.
    processed: u64,
}

impl PathManager {
    /// Create the path's directory, open its version log, and start the
    /// manager task.
    pub(crate) async fn spawn(
        path: VfsPath,
        deps: ManagerDeps,
        router: mpsc::Sender<RouterCommand>,
    ) -> ResourceResult<ManagerHandle> {
        let dir = path_util::path_dir(&deps.config.base_dir, &path);
        tokio::fs::create_dir_all(&dir).await?;
        let log = VersionLog::open(&dir).await?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let manager = PathManager {
            path,
            dir,
            log,
            open_resources: HashMap::new(),
            deps,
            router,
            processed: 0,
        };
        tokio::spawn(manager.run(rx));
        Ok(ManagerHandle { tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PathCommand>) {
        loop {
            let idle = tokio::time::sleep(self.deps.config.quiescence_timeout);
            tokio::select! {
                command = rx.recv() => match command {
                    None => break,
                    Some(PathCommand::Ingest { bundle, reply }) => {
                        self.processed += 1;
                        let results = self.apply_bundle(bundle).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(results);
                        }
                    }
                    Some(PathCommand::Read { version, reply }) => {
                        self.processed += 1;
                        let _ = reply.send(self.read(version).await);
                    }
                    Some(PathCommand::CurrentVersion { reply }) => {
                        self.processed += 1;
                        let _ = reply.send(Ok(self.log.current().cloned()));
                    }
                    Some(PathCommand::Quiesce) => self.quiesce_open().await,
                    Some(PathCommand::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                },
                _ = idle => {
                    self.quiesce_open().await;
                    let notice = RouterCommand::ManagerIdle {
                        path: self.path.clone(),
                        processed: self.processed,
                    };
                    match self.router.try_send(notice) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(path = %self.path, "router busy, idle notice skipped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Apply one path's slice of an ingest batch, in offset order, and
    /// report tracked outcomes to the job sink.
    async fn apply_bundle(&mut self, bundle: IngestBundle) -> Vec<ResourceResult<()>> {
        let IngestBundle { mut messages, perms } = bundle;
        messages.sort_by_key(|(offset, _)| *offset);

        let mut results = Vec::with_capacity(messages.len());
        for (offset, message) in messages {
            let job_id = message.job_id().map(str::to_string);
            let outcome = self.apply_message(offset, message, &perms).await;
            if let Some(job_id) = job_id {
                if let Err(e) = self.deps.jobs.record(&job_id, &self.path, &outcome).await {
                    warn!(job = %job_id, error = %e, "job tracker report failed");
                }
            }
            results.push(outcome);
        }
        results
    }

    async fn apply_message(
        &mut self,
        offset: u64,
        message: EventMessage,
        perms: &HashMap<String, Vec<WritePermission>>,
    ) -> ResourceResult<()> {
        match message {
            EventMessage::Ingest(msg) => self.apply_ingest(offset, msg, perms).await,
            EventMessage::StoreFile(msg) => self.apply_store_file(msg).await,
            EventMessage::Archive(msg) => self.apply_archive(msg).await,
        }
    }

    async fn apply_ingest(
        &mut self,
        offset: u64,
        msg: IngestMessage,
        perms: &HashMap<String, Vec<WritePermission>>,
    ) -> ResourceResult<()> {
        match msg.stream_ref {
            StreamRef::Create { id, terminal } => {
                let create_if_absent =
                    self.log.current().is_none() && !self.log.is_completed(id);
                self.persist_projection(create_if_absent, offset, msg, id, terminal)
                    .await
            }
            StreamRef::Replace { id, terminal } => {
                let create_if_absent = !self.log.is_completed(id);
                self.persist_projection(create_if_absent, offset, msg, id, terminal)
                    .await
            }
            StreamRef::Append => {
                let id = self
                    .log
                    .current()
                    .map(|entry| entry.id)
                    .unwrap_or_else(VersionId::random);
                if self.log.find(id).is_none() {
                    let granted = perms.get(&msg.api_key).map(Vec::as_slice).unwrap_or(&[]);
                    if !can_create(&msg.path, granted, &msg.write_as) {
                        return Err(ResourceError::PermissionDenied(format!(
                            "{} may not write to {} as {}",
                            msg.api_key, msg.path, msg.write_as
                        )));
                    }
                }
                self.persist_projection(true, offset, msg, id, false).await?;
                self.log.complete_version(id).await?;
                self.log.set_head(id).await?;
                Ok(())
            }
        }
    }

    async fn apply_store_file(&mut self, msg: StoreFileMessage) -> ResourceResult<()> {
        match msg.stream_ref {
            StreamRef::Append => Err(ResourceError::IllegalWriteRequest(format!(
                "blobs do not support append ({})",
                self.path
            ))),
            StreamRef::Create { id, terminal } => {
                let create_if_absent =
                    self.log.current().is_none() && !self.log.is_completed(id);
                self.persist_blob(create_if_absent, msg, id, terminal).await
            }
            StreamRef::Replace { id, terminal } => {
                let create_if_absent = !self.log.is_completed(id);
                self.persist_blob(create_if_absent, msg, id, terminal).await
            }
        }
    }

    async fn apply_archive(&mut self, _msg: ArchiveMessage) -> ResourceResult<()> {
        self.log.clear_head().await?;
        Ok(())
    }

    async fn persist_projection(
        &mut self,
        create_if_absent: bool,
        offset: u64,
        msg: IngestMessage,
        id: VersionId,
        terminal: bool,
    ) -> ResourceResult<()> {
        if self.log.find(id).is_some() {
            let resource = self.open_resource(id).await?;
            let Some(projection) = resource.as_projection() else {
                return Err(ResourceError::IllegalWriteRequest(format!(
                    "version {id} of {} is not a projection",
                    self.path
                )));
            };
            projection.append(Batch::new(offset, msg.data)).await?;
            if terminal {
                self.log.complete_version(id).await?;
                self.log.set_head(id).await?;
            }
            Ok(())
        } else if create_if_absent {
            self.perform_create(
                id,
                CreatePayload::Projection {
                    seed: Batch::new(offset, msg.data),
                },
                msg.write_as,
                terminal,
            )
            .await
        } else {
            Err(ResourceError::IllegalWriteRequest(format!(
                "no writable version of {} for this stream ref",
                self.path
            )))
        }
    }

    async fn persist_blob(
        &mut self,
        create_if_absent: bool,
        msg: StoreFileMessage,
        id: VersionId,
        terminal: bool,
    ) -> ResourceResult<()> {
        if self.log.find(id).is_some() {
            return Err(ResourceError::IllegalWriteRequest(format!(
                "blob version {id} of {} already exists",
                self.path
            )));
        }
        if !create_if_absent {
            return Err(ResourceError::IllegalWriteRequest(format!(
                "no writable version of {} for this stream ref",
                self.path
            )));
        }
        if !terminal {
            // Accepted, but nothing can continue the stream later.
            warn!(path = %self.path, version = %id, "non-terminal blob create accepted; stream cannot be continued");
        }
        self.perform_create(
            id,
            CreatePayload::Blob {
                content: msg.content,
            },
            msg.write_as,
            terminal,
        )
        .await
    }

    /// Record the version, materialize its resource, and (when terminal)
    /// complete it and move the head.
    ///
    /// Completion and head are two log records; a crash between them
    /// leaves a completed-but-not-headed version that recovery treats as
    /// archived.
    async fn perform_create(
        &mut self,
        id: VersionId,
        payload: CreatePayload,
        write_as: Authorities,
        terminal: bool,
    ) -> ResourceResult<()> {
        let kind = match &payload {
            CreatePayload::Projection { .. } => ResourceType::Projection,
            CreatePayload::Blob { .. } => ResourceType::Blob,
        };
        self.log
            .add_version(VersionEntry {
                id,
                kind,
                created_at: self.deps.clock.now(),
            })
            .await?;

        let vdir = path_util::version_dir(&self.dir, id);
        let resource = match payload {
            CreatePayload::Projection { seed } => {
                let projection = self.deps.builder.create_projection(&vdir, write_as).await?;
                projection.append(seed).await?;
                Resource::Projection(projection)
            }
            CreatePayload::Blob { content } => {
                let blob = self
                    .deps
                    .builder
                    .create_blob(
                        &vdir,
                        &content.mime_type,
                        write_as,
                        Cursor::new(content.bytes),
                    )
                    .await?;
                Resource::Blob(blob)
            }
        };
        self.open_resources.insert(id, resource.clone());

        if terminal {
            self.log.complete_version(id).await?;
            self.log.set_head(id).await?;
            self.maybe_invalidate_cache(&resource);
        }
        Ok(())
    }

    /// Writing a script blob invalidates the companion `.cached` sub-path.
    /// Fire-and-forget through the router; failures are logged only.
    fn maybe_invalidate_cache(&self, resource: &Resource) {
        let Resource::Blob(blob) = resource else {
            return;
        };
        if blob.mime_type() != MIME_SCRIPT {
            return;
        }
        let cached = self.path.child(".cached");
        let message = EventMessage::Archive(ArchiveMessage {
            api_key: String::new(),
            path: cached.clone(),
            job_id: None,
            timestamp: self.deps.clock.now(),
        });
        let command = RouterCommand::Ingest {
            messages: vec![(0, message)],
            reply: None,
        };
        if let Err(e) = self.router.try_send(command) {
            warn!(path = %cached, error = %e, "cache invalidation send failed");
        }
    }

    /// Resolve a version id to an open resource, consulting the cache
    /// first, then the log and the version directory's marker.
    async fn open_resource(&mut self, id: VersionId) -> ResourceResult<Resource> {
        if let Some(resource) = self.open_resources.get(&id) {
            return Ok(resource.clone());
        }
        if self.log.find(id).is_none() {
            return Err(ResourceError::Corrupt(format!(
                "version {id} not recorded for {}",
                self.path
            )));
        }
        let vdir = path_util::version_dir(&self.dir, id);
        let resource = if ResourceBuilder::is_blob(&vdir).await {
            Resource::Blob(self.deps.builder.open_blob(&vdir).await?)
        } else if ResourceBuilder::is_projection(&vdir).await {
            Resource::Projection(self.deps.builder.open_projection(&vdir).await?)
        } else {
            return Err(ResourceError::Corrupt(format!(
                "version {id} of {} has no resource on disk",
                self.path
            )));
        };
        self.open_resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn read(&mut self, version: Version) -> ResourceResult<Resource> {
        match version {
            Version::Current => match self.log.current() {
                Some(entry) => {
                    let id = entry.id;
                    self.open_resource(id).await
                }
                None => Err(ResourceError::NotFound(format!(
                    "no current version of {}",
                    self.path
                ))),
            },
            Version::Archived(id) => self.open_resource(id).await,
        }
    }

    async fn quiesce_open(&mut self) {
        for (id, resource) in &self.open_resources {
            if let Resource::Projection(projection) = resource {
                if let Err(e) = projection.quiesce().await {
                    warn!(path = %self.path, version = %id, error = %e, "projection quiesce failed");
                }
            }
        }
    }

    /// Close every open resource and the log. Best-effort and bounded:
    /// failures are logged, the task terminates either way.
    async fn shutdown(self) {
        let deadline = self.deps.config.shutdown_timeout;
        let path = self.path.clone();
        let work = async move {
            for (id, resource) in &self.open_resources {
                if let Err(e) = resource.close().await {
                    warn!(path = %self.path, version = %id, error = %e, "resource close failed");
                }
            }
            if let Err(e) = self.log.close().await {
                warn!(path = %self.path, error = %e, "version log close failed");
            }
        };
        if tokio::time::timeout(deadline, work).await.is_err() {
            warn!(path = %path, "shutdown deadline exceeded");
        }
    }
}
