//! Logical path to on-disk directory mapping, and the discovery walk.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<seg>/<seg>/...      # one directory per encoded path segment
//!     version.log             # the path's version log
//!     versions/<version-id>/  # one directory per version
//!     <child-seg>/...         # children nest alongside
//! ```
//!
//! Segments are percent-encoded so the mapping is deterministic and
//! injective, and so no logical segment can collide with the reserved
//! `versions` / `version.log` names.

use std::path::{Path, PathBuf};

use tracing::warn;

use kura_types::{PathMetadata, PathNodeKind, ResourceError, ResourceResult, VfsPath};

use crate::resource::ResourceBuilder;
use crate::version_log::{LogSnapshot, VERSION_LOG_FILE};

/// Subdirectory of a path directory holding one directory per version.
pub const VERSIONS_DIR: &str = "versions";

fn must_escape(index: usize, c: char) -> bool {
    c == '%' || c == '/' || c.is_control() || (index == 0 && c == '.')
}

/// Encode one logical segment for use as a directory name.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, c) in segment.chars().enumerate() {
        if must_escape(i, c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    // Reserved on-disk names get their first byte escaped; both are pure
    // ASCII so the removed char is one byte.
    if out == VERSIONS_DIR || out == VERSION_LOG_FILE {
        let first = out.remove(0);
        out.insert_str(0, &format!("%{:02X}", first as u8));
    }
    out
}

/// Decode a directory name back to its logical segment.
///
/// Returns `None` for names that are not valid encodings (stray `%`,
/// non-hex escape, invalid UTF-8), which is how foreign directories are
/// filtered out of discovery.
pub fn decode_segment(name: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut iter = name.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    let decoded = String::from_utf8(bytes).ok()?;
    if decoded.is_empty() {
        return None;
    }
    Some(decoded)
}

/// The on-disk directory for a logical path.
pub fn path_dir(base: &Path, path: &VfsPath) -> PathBuf {
    let mut dir = base.to_path_buf();
    for segment in path.segments() {
        dir.push(encode_segment(segment));
    }
    dir
}

/// The on-disk directory for one version of a path.
pub fn version_dir(path_dir: &Path, id: kura_types::VersionId) -> PathBuf {
    path_dir.join(VERSIONS_DIR).join(id.to_string())
}

/// Derive what kind of node lives in `dir` right now.
///
/// A node with no log, no current version, or an unreadable log is a plain
/// directory; otherwise the current version directory's marker decides.
async fn node_kind(dir: &Path) -> PathNodeKind {
    let snapshot = match LogSnapshot::load(dir).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return PathNodeKind::Directory,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unreadable version log during discovery");
            return PathNodeKind::Directory;
        }
    };
    let Some(entry) = snapshot.current() else {
        return PathNodeKind::Directory;
    };
    let vdir = version_dir(dir, entry.id);
    if ResourceBuilder::is_blob(&vdir).await {
        PathNodeKind::Blob
    } else if ResourceBuilder::is_projection(&vdir).await {
        PathNodeKind::Projection
    } else {
        PathNodeKind::Directory
    }
}

/// One-level child listing for `path`, relative to the requested prefix.
///
/// Walks the directory snapshot without materializing any manager; foreign
/// (non-decodable) entries and the reserved names are skipped.
pub async fn find_children(base: &Path, path: &VfsPath) -> ResourceResult<Vec<PathMetadata>> {
    let dir = path_dir(base, path);
    let mut read_dir = match tokio::fs::read_dir(&dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResourceError::NotFound(format!("no children under {path}")));
        }
        Err(e) => return Err(e.into()),
    };

    let mut children = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == VERSIONS_DIR {
            continue;
        }
        let Some(segment) = decode_segment(&name) else {
            continue;
        };
        let kind = node_kind(&entry.path()).await;
        children.push(PathMetadata::new(VfsPath::root().child(&segment), kind));
    }
    children.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(children)
}

/// Metadata for exactly one path node.
pub async fn find_metadata(base: &Path, path: &VfsPath) -> ResourceResult<PathMetadata> {
    let dir = path_dir(base, path);
    if !tokio::fs::try_exists(&dir).await? {
        return Err(ResourceError::NotFound(format!("no node at {path}")));
    }
    Ok(PathMetadata::new(path.clone(), node_kind(&dir).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain_segment_unchanged() {
        assert_eq!(encode_segment("data"), "data");
        assert_eq!(encode_segment("a.b"), "a.b");
    }

    #[test]
    fn test_encode_escapes_specials() {
        assert_eq!(encode_segment(".cached"), "%2Ecached");
        assert_eq!(encode_segment("50%"), "50%25");
        assert_eq!(encode_segment("a\nb"), "a%0Ab");
    }

    #[test]
    fn test_reserved_names_escaped() {
        assert_eq!(encode_segment("versions"), "%76ersions");
        assert_eq!(encode_segment("version.log"), "%76ersion.log");
        assert_eq!(decode_segment("%76ersions").as_deref(), Some("versions"));
    }

    #[test]
    fn test_round_trip() {
        for segment in [".cached", "50%", "a\tb", "versions", "データ", "plain"] {
            let encoded = encode_segment(segment);
            assert_eq!(decode_segment(&encoded).as_deref(), Some(segment), "{segment}");
        }
    }

    #[test]
    fn test_decode_rejects_invalid() {
        assert_eq!(decode_segment("bad%zz"), None);
        assert_eq!(decode_segment("trailing%2"), None);
        assert_eq!(decode_segment(""), None);
    }

    #[test]
    fn test_path_dir_nests_segments() {
        let path: VfsPath = "/a/.b".parse().unwrap();
        let dir = path_dir(Path::new("/base"), &path);
        assert_eq!(dir, PathBuf::from("/base/a/%2Eb"));
    }

    #[tokio::test]
    async fn test_find_children_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path: VfsPath = "/nope".parse().unwrap();
        let result = find_children(tmp.path(), &path).await;
        assert!(matches!(result, Err(ResourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_children_skips_foreign_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let root: VfsPath = VfsPath::root();
        std::fs::create_dir_all(tmp.path().join("a")).unwrap();
        std::fs::create_dir_all(tmp.path().join("b")).unwrap();
        std::fs::create_dir_all(tmp.path().join(VERSIONS_DIR)).unwrap();
        std::fs::create_dir_all(tmp.path().join("bad%zz")).unwrap();
        std::fs::write(tmp.path().join("file"), b"x").unwrap();

        let children = find_children(tmp.path(), &root).await.unwrap();
        let names: Vec<String> = children.iter().map(|c| c.path.to_string()).collect();
        assert_eq!(names, vec!["/a", "/b"]);
        assert!(children.iter().all(|c| c.kind == PathNodeKind::Directory));
    }
}
