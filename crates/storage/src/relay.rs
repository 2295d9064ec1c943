use crate::access::AccessCode;
use crate::clock::{Clock, SystemClock};
use crate::error::RelayError;
use crate::record::{age_since, is_record_id, new_record_id, RelayFileRecord};
use crate::{BlobReader, LocalStorage, Storage};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub data_dir: PathBuf,
    pub access_code: Option<String>,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Hint handed to clients for splitting large uploads.
    pub upload_chunk_size: usize,
    pub max_upload_bytes: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("bcshare-data"),
            access_code: None,
            ttl_secs: 600,
            sweep_interval_secs: 300,
            upload_chunk_size: 90 * 1024 * 1024,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Copy safe to print: the access code is masked.
    pub fn redacted(&self) -> Self {
        Self {
            access_code: self.access_code.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("RelayConfig")
            .field("data_dir", &redacted.data_dir)
            .field("access_code", &redacted.access_code)
            .field("ttl_secs", &redacted.ttl_secs)
            .field("sweep_interval_secs", &redacted.sweep_interval_secs)
            .field("upload_chunk_size", &redacted.upload_chunk_size)
            .field("max_upload_bytes", &redacted.max_upload_bytes)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub complete: bool,
    pub chunks_received: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_records: usize,
    pub abandoned_uploads: usize,
    pub orphan_blobs: usize,
}

/// A chunked upload between `init_upload` and its last chunk.
#[derive(Debug)]
struct PendingUpload {
    original_name: String,
    size: u64,
    started: DateTime<Utc>,
    chunks_received: u32,
    total_chunks: Option<u32>,
    bytes: u64,
    /// Set once finalized or discarded; late chunks then see not-found.
    closed: bool,
}

pub struct RelayStore {
    storage: Arc<dyn Storage>,
    access: AccessCode,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    upload_chunk_size: usize,
    max_upload_bytes: u64,
    pending: DashMap<String, Arc<Mutex<PendingUpload>>>,
    /// Unowned blobs by the clock time a sweep first found them.
    orphans_seen: DashMap<String, DateTime<Utc>>,
}

impl RelayStore {
    /// Filesystem-backed store on the wall clock.
    pub fn new(cfg: &RelayConfig) -> anyhow::Result<Self> {
        let storage = LocalStorage::new(cfg.data_dir.clone())?;
        Ok(Self::with_parts(
            Arc::new(storage),
            AccessCode::new(cfg.access_code.as_deref()),
            cfg,
            Arc::new(SystemClock),
        ))
    }

    pub fn with_parts(storage: Arc<dyn Storage>, access: AccessCode, cfg: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        if !access.is_configured() {
            tracing::warn!("No relay access code configured; uploads are disabled");
        }
        Self {
            storage,
            access,
            clock,
            ttl: cfg.ttl(),
            upload_chunk_size: cfg.upload_chunk_size,
            max_upload_bytes: cfg.max_upload_bytes,
            pending: DashMap::new(),
            orphans_seen: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn upload_chunk_size(&self) -> usize {
        self.upload_chunk_size
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn validate_code(&self, code: &str) -> bool {
        self.access.verify(code)
    }

    /// Single-shot upload. Nothing is stored unless the code checks out.
    pub async fn create_upload(&self, code: &str, name: &str, data: &[u8]) -> Result<String, RelayError> {
        self.authorize(code)?;
        validate_name(name)?;
        self.check_size(data.len() as u64)?;

        let id = new_record_id();
        self.storage.put_blob(&id, data).await?;

        let record = RelayFileRecord::new(id.clone(), name, data.len() as u64, self.clock.now());
        if let Err(e) = self.storage.put_record(&record).await {
            let _ = self.storage.delete_blob(&id).await;
            return Err(e.into());
        }

        tracing::info!("Stored upload {} ({} bytes)", id, record.size);
        Ok(id)
    }

    /// Start a chunked upload. The record appears only after the last chunk.
    pub async fn init_upload(&self, code: &str, name: &str, size: u64) -> Result<String, RelayError> {
        self.authorize(code)?;
        validate_name(name)?;
        self.check_size(size)?;

        let id = new_record_id();
        self.storage.put_blob(&id, &[]).await?;
        self.pending.insert(
            id.clone(),
            Arc::new(Mutex::new(PendingUpload {
                original_name: name.to_string(),
                size,
                started: self.clock.now(),
                chunks_received: 0,
                total_chunks: None,
                bytes: 0,
                closed: false,
            })),
        );

        tracing::info!("Started chunked upload {} ({} bytes declared)", id, size);
        Ok(id)
    }

    /// Append chunk `chunk_index` of `total_chunks`. Chunks must arrive in order.
    pub async fn upload_chunk(
        &self,
        code: &str,
        id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<ChunkOutcome, RelayError> {
        self.authorize(code)?;
        if !is_record_id(id) {
            return Err(RelayError::NotFoundOrExpired);
        }
        let entry = self
            .pending
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(RelayError::NotFoundOrExpired)?;
        let mut upload = entry.lock().await;

        if upload.closed {
            return Err(RelayError::NotFoundOrExpired);
        }
        if age_since(upload.started, self.clock.now()) > self.ttl {
            self.discard(id, &mut upload).await;
            return Err(RelayError::NotFoundOrExpired);
        }
        if total_chunks == 0 || upload.total_chunks.is_some_and(|t| t != total_chunks) {
            return Err(RelayError::validation("inconsistent totalChunks"));
        }
        if chunk_index != upload.chunks_received || chunk_index >= total_chunks {
            return Err(RelayError::validation(format!(
                "expected chunk {}, got {}",
                upload.chunks_received, chunk_index
            )));
        }
        if upload.bytes + data.len() as u64 > upload.size {
            self.discard(id, &mut upload).await;
            return Err(RelayError::validation("upload exceeds declared size"));
        }

        upload.bytes = match self.storage.append_blob(id, data).await {
            Ok(len) => len,
            Err(e) => {
                self.discard(id, &mut upload).await;
                return Err(e.into());
            }
        };
        upload.total_chunks = Some(total_chunks);
        upload.chunks_received += 1;
        tracing::debug!("Upload {}: chunk {}/{} ({} bytes so far)", id, chunk_index + 1, total_chunks, upload.bytes);

        if upload.chunks_received < total_chunks {
            return Ok(ChunkOutcome {
                complete: false,
                chunks_received: upload.chunks_received,
            });
        }

        if upload.bytes != upload.size {
            self.discard(id, &mut upload).await;
            return Err(RelayError::validation(format!(
                "received {} bytes, declared {}",
                upload.bytes, upload.size
            )));
        }

        let record = RelayFileRecord::new(id.to_string(), upload.original_name.clone(), upload.size, self.clock.now());
        if let Err(e) = self.storage.put_record(&record).await {
            self.discard(id, &mut upload).await;
            return Err(e.into());
        }
        upload.closed = true;
        self.pending.remove(id);

        tracing::info!("Finalized chunked upload {} ({} bytes)", id, record.size);
        Ok(ChunkOutcome {
            complete: true,
            chunks_received: upload.chunks_received,
        })
    }

    /// Metadata of a live record. Expired records are purged on the spot.
    pub async fn fetch_metadata(&self, id: &str) -> Result<RelayFileRecord, RelayError> {
        self.live_record(id).await
    }

    /// Record plus a reader over its bytes, after the same expiry check.
    pub async fn open_download(&self, id: &str) -> Result<(RelayFileRecord, BlobReader), RelayError> {
        let record = self.live_record(id).await?;
        match self.storage.open_blob(id).await? {
            Some(reader) => Ok((record, reader)),
            None => {
                tracing::warn!("Record {} has no blob; removing it", id);
                self.storage.delete_record(id).await?;
                Err(RelayError::NotFoundOrExpired)
            }
        }
    }

    /// Delete a record and then its blob. A missing blob is fine.
    ///
    /// Record first: lookups fail fast, while a download that already holds
    /// the blob open finishes.
    pub async fn expire(&self, id: &str) -> anyhow::Result<()> {
        self.storage.delete_record(id).await?;
        if !self.storage.delete_blob(id).await? {
            tracing::debug!("Blob for {} was already gone", id);
        }
        tracing::info!("Expired upload {}", id);
        Ok(())
    }

    /// Remove expired records, abandoned chunked uploads, and blobs nobody owns.
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for record in self.storage.list_records().await? {
            if record.is_expired(now, self.ttl) {
                match self.expire(&record.id).await {
                    Ok(()) => report.expired_records += 1,
                    Err(e) => tracing::error!("Failed to expire {}: {:#}", record.id, e),
                }
            }
        }

        let pending: Vec<(String, Arc<Mutex<PendingUpload>>)> = self
            .pending
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, entry) in pending {
            let mut upload = entry.lock().await;
            if !upload.closed && age_since(upload.started, now) > self.ttl {
                self.discard(&id, &mut upload).await;
                report.abandoned_uploads += 1;
            }
        }

        // Orphans get a full TTL on this store's clock from the sweep that
        // first finds them; file mtimes are not on that clock.
        let mut unowned = HashSet::new();
        for blob in self.storage.list_blobs().await? {
            if self.pending.contains_key(&blob.id) {
                continue;
            }
            if is_record_id(&blob.id) && self.storage.get_record(&blob.id).await?.is_some() {
                continue;
            }
            let first_seen = *self.orphans_seen.entry(blob.id.clone()).or_insert(now);
            if age_since(first_seen, now) <= self.ttl {
                unowned.insert(blob.id);
                continue;
            }
            if self.storage.delete_blob(&blob.id).await? {
                tracing::info!("Removed orphan blob {}", blob.id);
                report.orphan_blobs += 1;
            }
        }
        self.orphans_seen.retain(|id, _| unowned.contains(id));

        if report != SweepReport::default() {
            tracing::info!(
                "Sweep removed {} expired, {} abandoned, {} orphaned",
                report.expired_records,
                report.abandoned_uploads,
                report.orphan_blobs
            );
        }
        Ok(report)
    }

    /// Run `sweep` every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!("Sweep failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }

    fn authorize(&self, code: &str) -> Result<(), RelayError> {
        if self.access.verify(code) {
            Ok(())
        } else {
            tracing::warn!("Rejected upload with invalid access code");
            Err(RelayError::AccessDenied)
        }
    }

    fn check_size(&self, size: u64) -> Result<(), RelayError> {
        if size > self.max_upload_bytes {
            return Err(RelayError::validation(format!(
                "file too large ({} bytes, limit {})",
                size, self.max_upload_bytes
            )));
        }
        Ok(())
    }

    async fn live_record(&self, id: &str) -> Result<RelayFileRecord, RelayError> {
        if !is_record_id(id) {
            return Err(RelayError::NotFoundOrExpired);
        }
        let record = self
            .storage
            .get_record(id)
            .await?
            .ok_or(RelayError::NotFoundOrExpired)?;

        if record.is_expired(self.clock.now(), self.ttl) {
            if let Err(e) = self.expire(id).await {
                tracing::error!("Failed to purge expired {}: {:#}", id, e);
            }
            return Err(RelayError::NotFoundOrExpired);
        }
        Ok(record)
    }

    async fn discard(&self, id: &str, upload: &mut PendingUpload) {
        upload.closed = true;
        self.pending.remove(id);
        if let Err(e) = self.storage.delete_blob(id).await {
            tracing::error!("Failed to delete partial upload {}: {:#}", id, e);
        }
        tracing::info!("Discarded partial upload {}", id);
    }
}

fn validate_name(name: &str) -> Result<(), RelayError> {
    if name.trim().is_empty() {
        return Err(RelayError::validation("missing file name"));
    }
    if name.len() > 255 {
        return Err(RelayError::validation("file name too long"));
    }
    Ok(())
}
