//! Expiring relay store: access-code gated uploads kept for a fixed TTL.

pub mod access;
pub mod clock;
pub mod error;
pub mod record;
pub mod relay;

pub use access::AccessCode;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RelayError;
pub use record::{is_record_id, new_record_id, RecordMetadata, RelayFileRecord};
pub use relay::{ChunkOutcome, RelayConfig, RelayStore, SweepReport};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Readable blob handle.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub id: String,
}

/// Storage trait for blob and record persistence.
///
/// Ids reaching this layer have already been checked with `is_record_id`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put_blob(&self, id: &str, data: &[u8]) -> Result<()>;
    /// Append to a blob, creating it if needed. Returns the new length.
    async fn append_blob(&self, id: &str, data: &[u8]) -> Result<u64>;
    async fn open_blob(&self, id: &str) -> Result<Option<BlobReader>>;
    async fn blob_len(&self, id: &str) -> Result<Option<u64>>;
    /// False if there was nothing to delete.
    async fn delete_blob(&self, id: &str) -> Result<bool>;
    async fn list_blobs(&self) -> Result<Vec<BlobInfo>>;

    async fn put_record(&self, record: &RelayFileRecord) -> Result<()>;
    async fn get_record(&self, id: &str) -> Result<Option<RelayFileRecord>>;
    async fn delete_record(&self, id: &str) -> Result<bool>;
    async fn list_records(&self) -> Result<Vec<RelayFileRecord>>;
}

/// Local filesystem-based storage implementation.
///
/// ```text
/// <base>/blobs/<first 2 chars>/<id>
/// <base>/records/<id>.json
/// ```
#[derive(Clone)]
pub struct LocalStorage {
    blobs_dir: PathBuf,
    records_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let blobs_dir = base_dir.join("blobs");
        let records_dir = base_dir.join("records");
        std::fs::create_dir_all(&blobs_dir).context("Failed to create blobs directory")?;
        std::fs::create_dir_all(&records_dir).context("Failed to create records directory")?;

        Ok(Self { blobs_dir, records_dir })
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        // Use first 2 chars as subdirectory for better filesystem performance
        let prefix = &id[..2.min(id.len())];
        self.blobs_dir.join(prefix).join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.records_dir.join(format!("{id}.json"))
    }

    async fn ensure_parent(&self, id: &str) -> Result<PathBuf> {
        let path = self.blob_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create blob subdirectory")?;
        }
        Ok(path)
    }
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_blob(&self, id: &str, data: &[u8]) -> Result<()> {
        let path = self.ensure_parent(id).await?;
        fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write blob {}", id))?;

        tracing::debug!("Stored blob {} ({} bytes)", id, data.len());
        Ok(())
    }

    async fn append_blob(&self, id: &str, data: &[u8]) -> Result<u64> {
        let path = self.ensure_parent(id).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open blob {} for append", id))?;
        file.write_all(data)
            .await
            .with_context(|| format!("Failed to append to blob {}", id))?;
        file.flush().await?;

        let len = file.metadata().await?.len();
        tracing::debug!("Appended {} bytes to blob {} (now {})", data.len(), id, len);
        Ok(len)
    }

    async fn open_blob(&self, id: &str) -> Result<Option<BlobReader>> {
        match fs::File::open(self.blob_path(id)).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to open blob {}", id)),
        }
    }

    async fn blob_len(&self, id: &str) -> Result<Option<u64>> {
        match fs::metadata(self.blob_path(id)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat blob {}", id)),
        }
    }

    async fn delete_blob(&self, id: &str) -> Result<bool> {
        let removed = remove_if_present(&self.blob_path(id)).await?;
        if removed {
            tracing::debug!("Deleted blob {}", id);
        }
        Ok(removed)
    }

    async fn list_blobs(&self) -> Result<Vec<BlobInfo>> {
        let mut blobs = Vec::new();
        let mut prefixes = fs::read_dir(&self.blobs_dir)
            .await
            .context("Failed to list blobs directory")?;

        while let Some(prefix) = prefixes.next_entry().await? {
            if !prefix.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(prefix.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let id = entry.file_name().to_string_lossy().into_owned();
                blobs.push(BlobInfo { id });
            }
        }
        Ok(blobs)
    }

    async fn put_record(&self, record: &RelayFileRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;

        // Write then rename so readers never see a torn record.
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write record {}", record.id))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit record {}", record.id))?;
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<RelayFileRecord>> {
        let data = match fs::read(self.record_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read record {}", id)),
        };
        let record = serde_json::from_slice(&data).with_context(|| format!("Corrupt record {}", id))?;
        Ok(Some(record))
    }

    async fn delete_record(&self, id: &str) -> Result<bool> {
        remove_if_present(&self.record_path(id)).await
    }

    async fn list_records(&self) -> Result<Vec<RelayFileRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.records_dir)
            .await
            .context("Failed to list records directory")?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read(&path).await?;
            match serde_json::from_slice::<RelayFileRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}
