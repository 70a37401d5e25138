use super::Uploader;
use crate::error::UploadError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Appends each publish to `<dir>/<label>.log`.
#[derive(Debug, Clone)]
pub struct FileUploader {
    dir: PathBuf,
}

impl FileUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that publishes for `label` are appended to.
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize_label(label)))
    }
}

/// Reduce a label to a safe file stem.
fn sanitize_label(label: &str) -> String {
    let stem: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "capture".to_string()
    } else {
        stem.to_string()
    }
}

#[async_trait::async_trait]
impl Uploader for FileUploader {
    async fn publish(&self, label: &str, content: Bytes) -> Result<(), UploadError> {
        let io_err = |e: std::io::Error| UploadError::Io(e.to_string());

        fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let path = self.path_for(label);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let header = format!("=== {label} @ {timestamp} ===\n");

        file.write_all(header.as_bytes()).await.map_err(io_err)?;
        file.write_all(&content).await.map_err(io_err)?;
        if !content.ends_with(b"\n") {
            file.write_all(b"\n").await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;

        debug!("Appended {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}
