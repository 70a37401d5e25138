//! Publishing captured context to an external store.

pub mod file;

use crate::config::rule::RuleId;
use crate::config::upload::{UploadConfig, UploadKind};
use crate::error::UploadError;
use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use file::FileUploader;

/// External store for captured text. Injected into the engine at construction.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    async fn publish(&self, label: &str, content: Bytes) -> Result<(), UploadError>;
}

/// Accepts and discards every publish.
#[derive(Debug, Default)]
pub struct NullUploader;

#[async_trait::async_trait]
impl Uploader for NullUploader {
    async fn publish(&self, label: &str, content: Bytes) -> Result<(), UploadError> {
        debug!("Discarding {} bytes for '{}'", content.len(), label);
        Ok(())
    }
}

/// Keeps every publish in memory, optionally failing them.
#[derive(Debug, Default)]
pub struct MemoryUploader {
    published: Mutex<Vec<(String, String)>>,
    fail_with: Option<String>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish is rejected with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    /// `(label, content)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl Uploader for MemoryUploader {
    async fn publish(&self, label: &str, content: Bytes) -> Result<(), UploadError> {
        if let Some(reason) = &self.fail_with {
            return Err(UploadError::Rejected {
                label: label.to_string(),
                reason: reason.clone(),
            });
        }
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((label.to_string(), String::from_utf8_lossy(&content).into_owned()));
        Ok(())
    }
}

/// Build the uploader selected by the `upload:` section.
pub fn build_uploader(config: &UploadConfig) -> Arc<dyn Uploader> {
    match config.kind {
        UploadKind::File => Arc::new(FileUploader::new(config.resolved_dir())),
        UploadKind::None => Arc::new(NullUploader),
    }
}

/// Result of one publish attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub rule: RuleId,
    pub label: String,
    pub bytes: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs publishes off the control task, each under a timeout.
///
/// Results come back over a channel so the engine loop can observe them
/// without blocking on the store.
pub struct UploadDispatcher {
    uploader: Arc<dyn Uploader>,
    timeout: Duration,
    results_tx: mpsc::UnboundedSender<UploadRecord>,
    results_rx: mpsc::UnboundedReceiver<UploadRecord>,
    in_flight: usize,
    attempts: usize,
}

impl UploadDispatcher {
    pub fn new(uploader: Arc<dyn Uploader>, timeout: Duration) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            uploader,
            timeout,
            results_tx,
            results_rx,
            in_flight: 0,
            attempts: 0,
        }
    }

    pub fn schedule(&mut self, rule: RuleId, label: &str, content: String) {
        let uploader = Arc::clone(&self.uploader);
        let results_tx = self.results_tx.clone();
        let timeout = self.timeout;
        let label = label.to_string();
        let content = Bytes::from(content);

        self.in_flight += 1;
        self.attempts += 1;
        info!("📤 Uploading {} bytes as '{}'", content.len(), label);

        tokio::spawn(async move {
            let bytes = content.len();
            let result = match tokio::time::timeout(timeout, uploader.publish(&label, content)).await
            {
                Ok(result) => result,
                Err(_) => Err(UploadError::TimedOut(label.clone(), timeout)),
            };
            let record = UploadRecord {
                rule,
                label,
                bytes,
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            };
            // The dispatcher may be gone if the session ended first
            let _ = results_tx.send(record);
        });
    }

    /// Next finished publish. Pending while nothing is in flight.
    pub async fn next_result(&mut self) -> Option<UploadRecord> {
        let record = self.results_rx.recv().await?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(record)
    }

    /// Collect outstanding results, giving up after `limit`.
    pub async fn drain(&mut self, limit: Duration) -> Vec<UploadRecord> {
        let mut records = Vec::new();
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        while self.in_flight > 0 {
            tokio::select! {
                record = self.next_result() => match record {
                    Some(record) => records.push(record),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("{} upload(s) still in flight after {:?}", self.in_flight, limit);
                    break;
                }
            }
        }
        records
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
