//! End-to-end ingest scenarios through the facade.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;

use kura_vfs::{
    Authorities, EventMessage, FileContent, IngestMessage, PathNodeKind, Resource, ResourceError,
    StaticPermissions, StoreFileMessage, StreamRef, Version, VersionId, Vfs, VfsConfig, VfsPath,
    MIME_SCRIPT,
};

const API_KEY: &str = "test-key";

fn path(s: &str) -> VfsPath {
    s.parse().expect("valid path")
}

fn write_as() -> Authorities {
    Authorities::single("acct")
}

async fn open_vfs(dir: &TempDir) -> Vfs {
    let perms = StaticPermissions::new().grant_root(API_KEY, write_as());
    Vfs::open(VfsConfig::new(dir.path()), Arc::new(perms))
        .await
        .expect("vfs open")
}

fn ingest(target: &str, data: Vec<JsonValue>, stream_ref: StreamRef) -> EventMessage {
    EventMessage::Ingest(IngestMessage {
        api_key: API_KEY.to_string(),
        path: path(target),
        write_as: write_as(),
        data,
        job_id: None,
        stream_ref,
    })
}

fn store_file(target: &str, bytes: Vec<u8>, mime: &str, stream_ref: StreamRef) -> EventMessage {
    EventMessage::StoreFile(StoreFileMessage {
        api_key: API_KEY.to_string(),
        path: path(target),
        write_as: write_as(),
        content: FileContent {
            bytes,
            mime_type: mime.to_string(),
        },
        job_id: None,
        stream_ref,
    })
}

async fn scan_values(vfs: &Vfs, target: &str, version: Version) -> Vec<JsonValue> {
    let resource = vfs.read_resource(&path(target), version).await.expect("read");
    let projection = match &resource {
        Resource::Projection(p) => p,
        Resource::Blob(_) => panic!("expected a projection at {target}"),
    };
    let mut values = Vec::new();
    for batch in projection.scan().await {
        values.extend(batch.values);
    }
    values
}

#[tokio::test]
async fn test_create_terminal_sets_head() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();

    vfs.write_all_sync(vec![(
        0,
        ingest("/a/b", vec![json!({"x": 1})], StreamRef::Create { id: v1, terminal: true }),
    )])
    .await
    .expect("ingest");

    let current = vfs.current_version(&path("/a/b")).await.unwrap();
    assert_eq!(current.map(|e| e.id), Some(v1));
    assert_eq!(
        scan_values(&vfs, "/a/b", Version::Current).await,
        vec![json!({"x": 1})]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replace_supersedes_and_archives_previous() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();
    let v2 = VersionId::random();

    vfs.write_all_sync(vec![(
        0,
        ingest("/a/b", vec![json!({"x": 1})], StreamRef::Create { id: v1, terminal: true }),
    )])
    .await
    .unwrap();
    vfs.write_all_sync(vec![(
        1,
        ingest("/a/b", vec![json!({"x": 2})], StreamRef::Replace { id: v2, terminal: true }),
    )])
    .await
    .unwrap();

    let current = vfs.current_version(&path("/a/b")).await.unwrap();
    assert_eq!(current.map(|e| e.id), Some(v2));
    assert_eq!(
        scan_values(&vfs, "/a/b", Version::Current).await,
        vec![json!({"x": 2})]
    );
    assert_eq!(
        scan_values(&vfs, "/a/b", Version::Archived(v1)).await,
        vec![json!({"x": 1})]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_append_chain_preserves_offset_order() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    // Deliberately out of offset order within the batch.
    vfs.write_all_sync(vec![
        (11, ingest("/c", vec![json!("second")], StreamRef::Append)),
        (10, ingest("/c", vec![json!("first")], StreamRef::Append)),
        (12, ingest("/c", vec![json!("third")], StreamRef::Append)),
    ])
    .await
    .unwrap();

    let current = vfs.current_version(&path("/c")).await.unwrap();
    assert!(current.is_some(), "append to a fresh path creates a head version");
    assert_eq!(
        scan_values(&vfs, "/c", Version::Current).await,
        vec![json!("first"), json!("second"), json!("third")]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blob_append_is_illegal() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    let result = vfs
        .write_all_sync(vec![(0, store_file("/f", b"bytes".to_vec(), "text/plain", StreamRef::Append))])
        .await;
    assert!(matches!(result, Err(ResourceError::IllegalWriteRequest(_))));

    // No version was created.
    assert!(vfs.current_version(&path("/f")).await.unwrap().is_none());
    let meta = vfs.find_path_metadata(&path("/f")).await.unwrap();
    assert_eq!(meta.kind, PathNodeKind::Directory);

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_archive_clears_head_keeps_versions() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();
    let v2 = VersionId::random();

    vfs.write_all_sync(vec![(
        0,
        ingest("/a/b", vec![json!({"x": 1})], StreamRef::Create { id: v1, terminal: true }),
    )])
    .await
    .unwrap();
    vfs.write_all_sync(vec![(
        1,
        ingest("/a/b", vec![json!({"x": 2})], StreamRef::Replace { id: v2, terminal: true }),
    )])
    .await
    .unwrap();

    vfs.write_all_sync(vec![(
        2,
        EventMessage::Archive(kura_vfs::ArchiveMessage {
            api_key: API_KEY.to_string(),
            path: path("/a/b"),
            job_id: None,
            timestamp: chrono::Utc::now(),
        }),
    )])
    .await
    .unwrap();

    assert!(vfs.current_version(&path("/a/b")).await.unwrap().is_none());
    let current = vfs.read_resource(&path("/a/b"), Version::Current).await;
    assert!(matches!(current, Err(ResourceError::NotFound(_))));
    assert_eq!(
        scan_values(&vfs, "/a/b", Version::Archived(v2)).await,
        vec![json!({"x": 2})]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blob_round_trip() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();
    let payload: Vec<u8> = (0..=255u8).cycle().take(200 * 1024 + 17).collect();

    vfs.write_all_sync(vec![(
        0,
        store_file(
            "/files/raw",
            payload.clone(),
            "application/octet-stream",
            StreamRef::Create { id: v1, terminal: true },
        ),
    )])
    .await
    .unwrap();

    let resource = vfs
        .read_resource(&path("/files/raw"), Version::Current)
        .await
        .unwrap();
    let blob = resource.as_blob().expect("blob resource");
    assert_eq!(blob.metadata().size, payload.len() as u64);
    assert_eq!(blob.mime_type(), "application/octet-stream");
    assert_eq!(blob.read_bytes().await.unwrap(), payload);
    assert_eq!(blob.authorities(), &write_as());

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_text_blob_as_string() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();

    vfs.write_all_sync(vec![(
        0,
        store_file(
            "/files/note",
            "hello kura".as_bytes().to_vec(),
            "text/plain",
            StreamRef::Create { id: v1, terminal: true },
        ),
    )])
    .await
    .unwrap();

    let resource = vfs
        .read_resource(&path("/files/note"), Version::Current)
        .await
        .unwrap();
    let blob = resource.as_blob().unwrap();
    assert_eq!(blob.as_string().await.unwrap(), "hello kura");

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_create_on_existing_head_is_illegal() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();
    let v2 = VersionId::random();

    vfs.write_all_sync(vec![(
        0,
        ingest("/a", vec![json!(1)], StreamRef::Create { id: v1, terminal: true }),
    )])
    .await
    .unwrap();

    // Create (not Replace) while a head exists must be refused.
    let result = vfs
        .write_all_sync(vec![(
            1,
            ingest("/a", vec![json!(2)], StreamRef::Create { id: v2, terminal: true }),
        )])
        .await;
    assert!(matches!(result, Err(ResourceError::IllegalWriteRequest(_))));
    assert_eq!(
        vfs.current_version(&path("/a")).await.unwrap().map(|e| e.id),
        Some(v1)
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_create_replay_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;
    let v1 = VersionId::random();

    let message = ingest("/a", vec![json!({"x": 1})], StreamRef::Create { id: v1, terminal: true });
    vfs.write_all_sync(vec![(0, message.clone())]).await.unwrap();
    // Redelivery of the exact same message (same offset) is a no-op.
    vfs.write_all_sync(vec![(0, message)]).await.unwrap();

    assert_eq!(
        vfs.current_version(&path("/a")).await.unwrap().map(|e| e.id),
        Some(v1)
    );
    assert_eq!(
        scan_values(&vfs, "/a", Version::Current).await,
        vec![json!({"x": 1})]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_append_without_grant_is_denied() {
    let dir = TempDir::new().unwrap();
    let perms = StaticPermissions::new().grant_root(API_KEY, write_as());
    let vfs = Vfs::open(VfsConfig::new(dir.path()), Arc::new(perms)).await.unwrap();

    let denied = EventMessage::Ingest(IngestMessage {
        api_key: "unknown-key".to_string(),
        path: path("/locked"),
        write_as: write_as(),
        data: vec![json!(1)],
        job_id: None,
        stream_ref: StreamRef::Append,
    });
    let result = vfs.write_all_sync(vec![(0, denied)]).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied(_))));
    assert!(vfs.current_version(&path("/locked")).await.unwrap().is_none());

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sync_write_preserves_every_error() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    // Two illegal writes on different paths plus one good one.
    let result = vfs
        .write_all_sync(vec![
            (0, store_file("/x", b"a".to_vec(), "text/plain", StreamRef::Append)),
            (1, store_file("/y", b"b".to_vec(), "text/plain", StreamRef::Append)),
            (2, ingest("/ok", vec![json!(1)], StreamRef::Append)),
        ])
        .await;
    match result {
        Err(ResourceError::Compound(errors)) => {
            assert_eq!(errors.len(), 2);
            assert!(errors
                .iter()
                .all(|e| matches!(e, ResourceError::IllegalWriteRequest(_))));
        }
        other => panic!("expected compound failure, got {other:?}"),
    }

    // The good write still landed.
    assert!(vfs.current_version(&path("/ok")).await.unwrap().is_some());

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disjoint_paths_are_independent() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    let left = vfs.write_all_sync(vec![
        (0, ingest("/w1", vec![json!("l0")], StreamRef::Append)),
        (1, ingest("/w1", vec![json!("l1")], StreamRef::Append)),
    ]);
    let right = vfs.write_all_sync(vec![
        (0, ingest("/w2", vec![json!("r0")], StreamRef::Append)),
        (1, ingest("/w2", vec![json!("r1")], StreamRef::Append)),
    ]);
    let (left, right) = tokio::join!(left, right);
    left.unwrap();
    right.unwrap();

    assert_eq!(
        scan_values(&vfs, "/w1", Version::Current).await,
        vec![json!("l0"), json!("l1")]
    );
    assert_eq!(
        scan_values(&vfs, "/w2", Version::Current).await,
        vec![json!("r0"), json!("r1")]
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_find_children_reports_kinds_relative() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    vfs.write_all_sync(vec![(
        0,
        ingest("/data/table", vec![json!(1)], StreamRef::Append),
    )])
    .await
    .unwrap();
    vfs.write_all_sync(vec![(
        1,
        store_file(
            "/files",
            b"raw".to_vec(),
            "application/octet-stream",
            StreamRef::Create { id: VersionId::random(), terminal: true },
        ),
    )])
    .await
    .unwrap();

    // find_children returns results sorted by path.
    let children = vfs.find_direct_children(&VfsPath::root()).await.unwrap();
    let summary: Vec<(String, PathNodeKind)> = children
        .iter()
        .map(|c| (c.path.to_string(), c.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("/data".to_string(), PathNodeKind::Directory),
            ("/files".to_string(), PathNodeKind::Blob),
        ]
    );

    let children = vfs.find_direct_children(&path("/data")).await.unwrap();
    assert_eq!(children.len(), 1);
    // Children are relative to the requested prefix.
    assert_eq!(children[0].path.to_string(), "/table");
    assert_eq!(children[0].kind, PathNodeKind::Projection);

    let meta = vfs.find_path_metadata(&path("/data/table")).await.unwrap();
    assert_eq!(meta.kind, PathNodeKind::Projection);
    let missing = vfs.find_path_metadata(&path("/nope")).await;
    assert!(matches!(missing, Err(ResourceError::NotFound(_))));

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_script_blob_invalidates_cached_companion() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    vfs.write_all_sync(vec![(
        0,
        store_file(
            "/scripts/report",
            b"count(//foo)".to_vec(),
            MIME_SCRIPT,
            StreamRef::Create { id: VersionId::random(), terminal: true },
        ),
    )])
    .await
    .unwrap();

    // The invalidation archive was routed to the companion path before our
    // discovery request, materializing it on disk.
    let children = vfs
        .find_direct_children(&path("/scripts/report"))
        .await
        .unwrap();
    assert!(
        children.iter().any(|c| c.path.to_string() == "/.cached"),
        "expected a .cached companion, got {children:?}"
    );

    vfs.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fire_and_forget_write_lands() {
    let dir = TempDir::new().unwrap();
    let vfs = open_vfs(&dir).await;

    vfs.write_all(vec![(0, ingest("/async", vec![json!(1)], StreamRef::Append))])
        .await
        .unwrap();

    // A sync write to the same path queues behind the async one.
    vfs.write_all_sync(vec![(1, ingest("/async", vec![json!(2)], StreamRef::Append))])
        .await
        .unwrap();

    assert_eq!(
        scan_values(&vfs, "/async", Version::Current).await,
        vec![json!(1), json!(2)]
    );

    vfs.shutdown().await.unwrap();
}
