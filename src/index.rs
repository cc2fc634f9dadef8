//! C6 (index half): append-only JSONL index, one [`IndexRecord`] per line.
//!
//! Generalizes the teacher's `output.rs` buffered-writer-behind-a-mutex
//! pattern from hand-rolled JSON escaping to `serde_json` line-at-a-time
//! serialization.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::fetch::FetchStatus;

/// One line of `<base>/index/<download_id>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub original_url: String,
    pub canonical_url: String,
    /// Relative to the batch content root.
    pub local_path: String,
    pub fetch_status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IndexRecord {
    pub fn success(
        original_url: impl Into<String>,
        canonical_url: impl Into<String>,
        local_path: impl Into<String>,
        content_type: Option<String>,
        content_md5: Option<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            canonical_url: canonical_url.into(),
            local_path: local_path.into(),
            fetch_status: FetchStatus::Success,
            http_status: None,
            content_type,
            content_md5,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        original_url: impl Into<String>,
        canonical_url: impl Into<String>,
        status: FetchStatus,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            canonical_url: canonical_url.into(),
            local_path: String::new(),
            fetch_status: status,
            http_status: None,
            content_type: None,
            content_md5: None,
            error_message: Some(error_message.into()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the HTTP response status observed for this fetch, if any
    /// (spec §8: a failed fetch's index record carries the status code that
    /// caused the failure, e.g. 404).
    pub fn with_http_status(mut self, http_status: Option<u16>) -> Self {
        self.http_status = http_status;
        self
    }
}

/// Serialized appends to one batch's index file. Cheap to clone (wraps an
/// `Arc`-free `Mutex` around the open file handle, owned for the batch's
/// duration by the crawl/git worker).
pub struct IndexWriter {
    file: Mutex<tokio::fs::File>,
}

impl IndexWriter {
    pub async fn create(base: &Path, download_id: &str) -> Result<Self> {
        let index_dir = base.join("index");
        tokio::fs::create_dir_all(&index_dir).await?;
        let path = index_dir.join(format!("{download_id}.jsonl"));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Append one complete JSON object followed by `\n`. Concurrent callers
    /// are serialized by the internal mutex so lines never interleave.
    pub async fn append(&self, record: &IndexRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub fn index_path(base: &Path, download_id: &str) -> PathBuf {
    base.join("index").join(format!("{download_id}.jsonl"))
}

/// Read and parse every line of a batch's index file. Malformed lines are
/// skipped with a warning rather than aborting the read, per the spec's
/// tolerant-reader requirement.
pub async fn read_index(base: &Path, download_id: &str) -> Result<Vec<IndexRecord>> {
    let path = index_path(base, download_id);
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::IndexNotFound(download_id.to_string()));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let mut reader = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = reader.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(download_id, line_no, error = %e, "skipping malformed index line");
            }
        }
    }

    Ok(records)
}
