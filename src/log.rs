//! Append-only JSONL event log, one entry per finished connection

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// How a connection ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Stored,
    Dropped,
    MalformedHeader,
    TransportError,
    StorageError,
}

/// One JSONL record per connection.
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadLogEntry {
    pub timestamp: String,
    pub upload_id: String,
    pub peer: String,
    pub status: UploadStatus,
    /// Time the request spent queued before a worker picked it up.
    pub queue_ms: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadLogEntry {
    /// Skeleton entry for one connection; callers fill in what the outcome
    /// provides.
    pub fn for_upload(upload_id: Uuid, peer: SocketAddr, status: UploadStatus) -> Self {
        UploadLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            upload_id: upload_id.to_string(),
            peer: peer.to_string(),
            status,
            queue_ms: 0,
            bytes: 0,
            sender_id: None,
            file_name: None,
            path: None,
            digest: None,
            error: None,
        }
    }
}

pub struct UploadLog {
    log_file_path: PathBuf,
}

impl UploadLog {
    pub fn new(log_file_path: PathBuf) -> Self {
        UploadLog { log_file_path }
    }

    pub fn add_entry(&self, entry: UploadLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open upload log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<UploadLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open upload log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: UploadLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_round_trip_through_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let log = UploadLog::new(dir.path().join("uploads.jsonl"));

        let mut stored = UploadLogEntry::for_upload(
            Uuid::new_v4(),
            "127.0.0.1:5000".parse().unwrap(),
            UploadStatus::Stored,
        );
        stored.sender_id = Some(7);
        stored.file_name = Some("clip.mp4".to_string());
        stored.bytes = 3;
        log.add_entry(stored).unwrap();

        let dropped = UploadLogEntry::for_upload(
            Uuid::new_v4(),
            "127.0.0.1:5001".parse().unwrap(),
            UploadStatus::Dropped,
        );
        log.add_entry(dropped).unwrap();

        let entries = log.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, UploadStatus::Stored);
        assert_eq!(entries[0].sender_id, Some(7));
        assert_eq!(entries[1].status, UploadStatus::Dropped);
        assert_eq!(entries[1].sender_id, None);
    }

    #[test]
    fn read_log_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = UploadLog::new(dir.path().join("absent.jsonl"));
        assert!(log.read_log().unwrap().is_empty());
    }
}
