//! kura-vfs (倉): a versioned, path-addressed virtual file system.
//!
//! This crate provides:
//!
//! - **VersionLog**: crash-consistent per-path record of version transitions
//! - **ResourceBuilder**: projection and blob resources in version directories
//! - **ProjectionStore**: the opaque columnar-engine seam + a local impl
//! - **PathManager**: single-writer ingest state machine, one actor per path
//! - **PathRouter**: bounded live-manager set with LRU quiescence
//! - **Vfs**: the client facade
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Vfs                               │
//! │   write_all / read_resource / find_children / shutdown       │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ mpsc
//! ┌───────────────────────────▼──────────────────────────────────┐
//! │                        PathRouter                            │
//! │   manager map + LRU · permission resolution · discovery      │
//! └───────┬──────────────────────┬───────────────────────┬───────┘
//!         │                      │                       │
//! ┌───────▼───────┐      ┌───────▼───────┐       ┌───────▼───────┐
//! │ PathManager /a│      │ PathManager /b│  ...  │ PathManager /c│
//! │  version log  │      │  version log  │       │  version log  │
//! │  resources    │      │  resources    │       │  resources    │
//! └───────────────┘      └───────────────┘       └───────────────┘
//! ```
//!
//! Each manager is the single writer for its path's filesystem subtree.
//! Messages for one path apply in offset order within a batch and FIFO
//! across batches; paths are independent of one another.

pub mod clock;
pub mod config;
pub mod jobs;
mod manager;
pub mod path_util;
pub mod perms;
pub mod projection;
pub mod resource;
mod router;
pub mod version_log;
pub mod vfs;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VfsConfig;
pub use jobs::{JobTracker, NoopJobTracker};
pub use perms::{can_create, PermissionsFinder, StaticPermissions};
pub use projection::{LocalProjectionStore, ProjectionStore};
pub use resource::{
    BlobResource, ProjectionResource, Resource, ResourceBuilder, MIME_PROJECTION, MIME_SCRIPT,
};
pub use version_log::{LogError, LogSnapshot, VersionLog};
pub use vfs::Vfs;

// Data types (re-exported from kura-types).
pub use kura_types::{
    ArchiveMessage, Authorities, Batch, BlobMetadata, EventMessage, FileContent, IngestMessage,
    PathMetadata, PathNodeKind, ResourceError, ResourceResult, ResourceType, StoreFileMessage,
    StreamRef, Version, VersionEntry, VersionId, VfsPath, WritePermission,
};
