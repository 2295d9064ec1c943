use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata announced ahead of a file's bytes: display name and declared size.
///
/// The name comes from the remote peer and is untrusted. Use
/// [`FileMetadata::safe_file_name`] before touching the filesystem with it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Build metadata for a file on disk, keeping only the final path component.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat file: {}", path.display()))?;

        if !meta.is_file() {
            anyhow::bail!("Not a regular file: {}", path.display());
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        Ok(Self::new(name, meta.len()))
    }

    /// Number of binary frames needed at the given chunk size.
    pub fn chunk_count(&self, chunk_size: usize) -> u64 {
        let chunk_size = chunk_size.max(1) as u64;
        self.size.div_ceil(chunk_size)
    }

    /// Final path component of the announced name, with separators and
    /// parent references stripped.
    pub fn safe_file_name(&self) -> String {
        let last = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();

        let cleaned: String = last
            .chars()
            .filter(|c| !c.is_control())
            .collect();

        match cleaned.as_str() {
            "" | "." | ".." => "received.bin".to_string(),
            _ => cleaned,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!("{} ({} bytes)", self.name, self.size)
    }
}
