//! Operations Log (§4.8): a fire-and-forget record of every call the
//! Execution Router dispatches — which vMCP, which tool/prompt/resource,
//! which upstream, how long it took, and whether it succeeded. Writes run
//! on a background task so a slow disk never adds latency to the call path
//! itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CallTool,
    GetPrompt,
    ReadResource,
}

/// One composed-call record (§4.8's call-logging payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub vmcp_id: String,
    pub kind: OperationKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_server_id: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OperationRecord {
    pub fn new(vmcp_id: impl Into<String>, kind: OperationKind, name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            vmcp_id: vmcp_id.into(),
            kind,
            name: name.into(),
            upstream_server_id: None,
            duration_ms: 0,
            success: true,
            error_message: None,
        }
    }

    pub fn with_upstream(mut self, server_id: impl Into<String>) -> Self {
        self.upstream_server_id = Some(server_id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct OperationsLoggerConfig {
    pub path: PathBuf,
    pub max_size_mb: u64,
    pub max_files: u32,
}

impl Default for OperationsLoggerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.vmcp/operations.log"),
            max_size_mb: 100,
            max_files: 10,
        }
    }
}

/// Handle callers hold: `record` just enqueues and returns immediately.
#[derive(Clone)]
pub struct OperationsLogger {
    tx: mpsc::UnboundedSender<OperationRecord>,
}

impl OperationsLogger {
    pub async fn new(config: OperationsLoggerConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&config.path).await?;
        let current_size = file.metadata().await?.len();

        let (tx, rx) = mpsc::unbounded_channel();
        info!("operations logger writing to {}", config.path.display());
        tokio::spawn(run_writer(config, file, current_size, rx));

        Ok(Self { tx })
    }

    /// Enqueues `record` for the background writer. Never blocks; drops the
    /// record only if the writer task has already shut down.
    pub fn record(&self, record: OperationRecord) {
        if self.tx.send(record).is_err() {
            error!("operations logger writer task is gone, dropping record");
        }
    }
}

async fn run_writer(
    config: OperationsLoggerConfig,
    mut file: tokio::fs::File,
    mut current_size: u64,
    mut rx: mpsc::UnboundedReceiver<OperationRecord>,
) {
    while let Some(record) = rx.recv().await {
        let line = match serde_json::to_string(&record) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                error!("failed to serialize operation record: {e}");
                continue;
            }
        };
        let bytes = line.as_bytes();

        if current_size + bytes.len() as u64 > config.max_size_mb * 1024 * 1024 {
            if let Err(e) = rotate(&config, &mut file).await {
                error!("failed to rotate operations log: {e}");
            } else {
                current_size = 0;
            }
        }

        if let Err(e) = file.write_all(bytes).await {
            error!("failed to write operation record: {e}");
            continue;
        }
        let _ = file.flush().await;
        current_size += bytes.len() as u64;
    }
}

async fn rotate(config: &OperationsLoggerConfig, file: &mut tokio::fs::File) -> std::io::Result<()> {
    let path = &config.path;
    let max_files = config.max_files;

    let oldest = format!("{}.{}.log", path.display(), max_files);
    let _ = tokio::fs::remove_file(&oldest).await;

    for i in (1..max_files).rev() {
        let from = format!("{}.{}.log", path.display(), i - 1);
        let to = format!("{}.{}.log", path.display(), i);
        let _ = tokio::fs::rename(&from, &to).await;
    }

    let rotated = format!("{}.0.log", path.display());
    let _ = tokio::fs::rename(path, &rotated).await;

    *file = OpenOptions::new().create(true).append(true).open(path).await?;
    info!("operations log rotated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn records_are_written_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.log");
        let logger = OperationsLogger::new(OperationsLoggerConfig {
            path: path.clone(),
            max_size_mb: 1,
            max_files: 2,
        })
        .await
        .unwrap();

        logger.record(
            OperationRecord::new("vmcp-1", OperationKind::CallTool, "github_read_file")
                .with_upstream("github")
                .with_duration(Duration::from_millis(42)),
        );

        // Give the background writer a turn.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("github_read_file"));
        assert!(content.contains("\"success\":true"));
    }
}
