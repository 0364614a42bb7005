//! Pure data types for kura — paths, versions, event messages, errors.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It
//! exists so that consumers (ingest frontends, external tools) can speak
//! kura's type system without pulling kura-vfs's transitive deps.

pub mod authority;
pub mod error;
pub mod message;
pub mod metadata;
pub mod path;
pub mod version;

// Flat re-exports for convenience
pub use authority::*;
pub use error::*;
pub use message::*;
pub use metadata::*;
pub use path::*;
pub use version::*;
