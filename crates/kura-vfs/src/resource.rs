//! Resource handles and the version-directory factory.
//!
//! A version directory holds exactly one of the two resource kinds,
//! distinguished by its marker file: `projection_metadata` or
//! `blob_metadata`. The builder is a pure factory rooted at a version
//! directory; it neither consults nor mutates the version log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use kura_types::{Authorities, Batch, BlobMetadata, ResourceError, ResourceResult, ResourceType};

use crate::clock::Clock;
use crate::projection::{LocalProjectionStore, ProjectionStore};

/// Marker + metadata file for a projection version directory.
pub const PROJECTION_METADATA_FILE: &str = "projection_metadata";
/// Marker + metadata file for a blob version directory.
pub const BLOB_METADATA_FILE: &str = "blob_metadata";
/// Raw bytes of a blob.
pub const BLOB_DATA_FILE: &str = "data";

/// Mimetype of projection data.
pub const MIME_PROJECTION: &str = "application/x-quirrel-data";
/// Mimetype of executable script blobs, whose companion `.cached` path is
/// invalidated on write.
pub const MIME_SCRIPT: &str = "text/x-quirrel-script";

/// Sidecar metadata persisted next to a projection store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionMetadata {
    authorities: Authorities,
    created: DateTime<Utc>,
}

/// An open projection version.
#[derive(Clone)]
pub struct ProjectionResource {
    store: Arc<dyn ProjectionStore>,
    authorities: Authorities,
}

impl ProjectionResource {
    pub fn mime_type(&self) -> &'static str {
        MIME_PROJECTION
    }

    pub fn authorities(&self) -> &Authorities {
        &self.authorities
    }

    pub async fn append(&self, batch: Batch) -> ResourceResult<()> {
        self.store.append(batch).await
    }

    /// Immutable snapshot of the ingested batches, in arrival order.
    pub async fn scan(&self) -> Vec<Batch> {
        self.store.scan().await
    }

    pub async fn record_count(&self) -> u64 {
        self.store.record_count().await
    }

    /// Render every record as one NDJSON line.
    pub async fn byte_stream(&self) -> ResourceResult<Vec<u8>> {
        let mut out = Vec::new();
        for batch in self.store.scan().await {
            for value in &batch.values {
                let mut line =
                    serde_json::to_vec(value).map_err(|e| ResourceError::Io(e.to_string()))?;
                line.push(b'\n');
                out.extend_from_slice(&line);
            }
        }
        Ok(out)
    }

    pub async fn quiesce(&self) -> ResourceResult<()> {
        self.store.quiesce().await
    }

    pub async fn close(&self) -> ResourceResult<()> {
        self.store.close().await
    }
}

impl std::fmt::Debug for ProjectionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionResource")
            .field("authorities", &self.authorities)
            .finish()
    }
}

/// An open blob version.
///
/// Holds no file handle; each byte stream opens the data file fresh, so a
/// handle handed to a reader stays cheap to clone and safe to keep.
#[derive(Debug, Clone)]
pub struct BlobResource {
    data_path: PathBuf,
    metadata: BlobMetadata,
}

impl BlobResource {
    pub fn metadata(&self) -> &BlobMetadata {
        &self.metadata
    }

    pub fn mime_type(&self) -> &str {
        &self.metadata.mime_type
    }

    pub fn authorities(&self) -> &Authorities {
        &self.metadata.authorities
    }

    /// Open the raw byte stream.
    pub async fn byte_stream(&self) -> ResourceResult<File> {
        Ok(File::open(&self.data_path).await?)
    }

    /// Read the whole blob into memory.
    pub async fn read_bytes(&self) -> ResourceResult<Vec<u8>> {
        Ok(tokio::fs::read(&self.data_path).await?)
    }

    /// Decode the blob as UTF-8. Only supported for text mimetypes.
    pub async fn as_string(&self) -> ResourceResult<String> {
        if !self.metadata.mime_type.starts_with("text/") {
            return Err(ResourceError::Extractor(format!(
                "blob is not text: {}",
                self.metadata.mime_type
            )));
        }
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes).map_err(|e| ResourceError::Extractor(e.to_string()))
    }

    pub async fn close(&self) -> ResourceResult<()> {
        // No retained handles; byte streams are opened per call.
        Ok(())
    }
}

/// A resource handle returned to readers.
#[derive(Debug, Clone)]
pub enum Resource {
    Projection(ProjectionResource),
    Blob(BlobResource),
}

impl Resource {
    pub fn kind(&self) -> ResourceType {
        match self {
            Resource::Projection(_) => ResourceType::Projection,
            Resource::Blob(_) => ResourceType::Blob,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Resource::Projection(p) => p.mime_type(),
            Resource::Blob(b) => b.mime_type(),
        }
    }

    pub fn authorities(&self) -> &Authorities {
        match self {
            Resource::Projection(p) => p.authorities(),
            Resource::Blob(b) => b.authorities(),
        }
    }

    pub fn as_projection(&self) -> Option<&ProjectionResource> {
        match self {
            Resource::Projection(p) => Some(p),
            Resource::Blob(_) => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobResource> {
        match self {
            Resource::Blob(b) => Some(b),
            Resource::Projection(_) => None,
        }
    }

    pub async fn close(&self) -> ResourceResult<()> {
        match self {
            Resource::Projection(p) => p.close().await,
            Resource::Blob(b) => b.close().await,
        }
    }
}

/// Factory for resources rooted at a version directory.
#[derive(Clone)]
pub struct ResourceBuilder {
    chunk_size: usize,
    clock: Arc<dyn Clock>,
}

impl ResourceBuilder {
    pub fn new(chunk_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self { chunk_size, clock }
    }

    /// Create an empty projection in `dir`, persisting its authorities.
    ///
    /// The marker file is written after the store initializes, so a
    /// half-created directory is never mistaken for a projection.
    pub async fn create_projection(
        &self,
        dir: &Path,
        authorities: Authorities,
    ) -> ResourceResult<ProjectionResource> {
        tokio::fs::create_dir_all(dir).await?;
        let store = LocalProjectionStore::create(dir).await?;
        let metadata = ProjectionMetadata {
            authorities: authorities.clone(),
            created: self.clock.now(),
        };
        write_json(&dir.join(PROJECTION_METADATA_FILE), &metadata).await?;
        Ok(ProjectionResource {
            store: Arc::new(store),
            authorities,
        })
    }

    /// Open an existing projection.
    pub async fn open_projection(&self, dir: &Path) -> ResourceResult<ProjectionResource> {
        let marker = dir.join(PROJECTION_METADATA_FILE);
        let bytes = match tokio::fs::read(&marker).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResourceError::NotFound(format!(
                    "no projection at {}",
                    dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: ProjectionMetadata = serde_json::from_slice(&bytes)?;
        let store = LocalProjectionStore::open(dir).await.map_err(|e| {
            ResourceError::Corrupt(format!("projection store at {}: {e}", dir.display()))
        })?;
        Ok(ProjectionResource {
            store: Arc::new(store),
            authorities: metadata.authorities,
        })
    }

    /// Create a blob in `dir`, streaming `reader` to the data file.
    ///
    /// Bytes are pulled in fixed-size chunks; the metadata file is written
    /// only after the stream completes and the data file is synced, so a
    /// mid-stream failure leaves a partial data file but never a readable
    /// blob.
    pub async fn create_blob<R>(
        &self,
        dir: &Path,
        mime_type: &str,
        authorities: Authorities,
        mut reader: R,
    ) -> ResourceResult<BlobResource>
    where
        R: AsyncRead + Send + Unpin,
    {
        tokio::fs::create_dir_all(dir).await?;
        let data_path = dir.join(BLOB_DATA_FILE);
        let mut file = File::create(&data_path).await?;

        let mut size: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let metadata = BlobMetadata {
            mime_type: mime_type.to_string(),
            size,
            created: self.clock.now(),
            authorities,
        };
        write_json(&dir.join(BLOB_METADATA_FILE), &metadata).await?;

        Ok(BlobResource {
            data_path,
            metadata,
        })
    }

    /// Open an existing blob.
    pub async fn open_blob(&self, dir: &Path) -> ResourceResult<BlobResource> {
        let marker = dir.join(BLOB_METADATA_FILE);
        let bytes = match tokio::fs::read(&marker).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResourceError::NotFound(format!(
                    "no blob at {}",
                    dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: BlobMetadata = serde_json::from_slice(&bytes)?;
        Ok(BlobResource {
            data_path: dir.join(BLOB_DATA_FILE),
            metadata,
        })
    }

    pub async fn is_projection(dir: &Path) -> bool {
        tokio::fs::try_exists(dir.join(PROJECTION_METADATA_FILE))
            .await
            .unwrap_or(false)
    }

    pub async fn is_blob(dir: &Path) -> bool {
        tokio::fs::try_exists(dir.join(BLOB_METADATA_FILE))
            .await
            .unwrap_or(false)
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> ResourceResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| ResourceError::Io(e.to_string()))?;
    let mut file = File::create(path).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
