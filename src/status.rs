//! Status egress for external pollers.
//!
//! A small record written atomically on every session state transition.
//! Dashboards and health checks read the file; nothing in the core reads it
//! back except the `check` command.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

// ============================================================================
// StatusRecord
// ============================================================================

/// The latest state transition, any account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub connected: bool,
    /// Human-readable reason, preserved verbatim from the transition.
    pub message: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    pub fn now(account_id: &str, connected: bool, message: impl Into<String>) -> Self {
        Self {
            connected,
            message: message.into(),
            account_id: account_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// StatusWriter
// ============================================================================

/// Writes status records atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, record: &StatusRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json.as_bytes()).await?;
        fs::rename(&temp_path, &self.path).await
    }
}

/// Read the latest status record, if one has been written.
pub async fn read_status(path: &Path) -> Option<StatusRecord> {
    let contents = fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&contents).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let writer = StatusWriter::new(&path);

        let record = StatusRecord::now("alice", true, "connected");
        writer.write(&record).await.unwrap();

        let loaded = read_status(&path).await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn later_write_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let writer = StatusWriter::new(&path);

        writer
            .write(&StatusRecord::now("alice", true, "connected"))
            .await
            .unwrap();
        writer
            .write(&StatusRecord::now("alice", false, "kicked: banned"))
            .await
            .unwrap();

        let loaded = read_status(&path).await.unwrap();
        assert!(!loaded.connected);
        assert_eq!(loaded.message, "kicked: banned");
    }

    #[tokio::test]
    async fn missing_file_reads_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read_status(&tmp.path().join("status.json")).await.is_none());
    }
}
