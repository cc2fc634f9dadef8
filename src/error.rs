//! Crate-wide error type.
//!
//! Mirrors the error-kind taxonomy of the specification: validation errors
//! never touch persisted state, per-URL fetch/policy/IO failures are meant to
//! be captured into an [`crate::index::IndexRecord`] rather than propagated,
//! and batch-fatal errors are the only ones that should reach a task-status
//! row's `error_details`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("URL has no scheme+host: {0}")]
    UrlMissingAuthority(String),

    #[error("refused to crawl internal/unresolvable host: {0}")]
    SsrfBlocked(String),

    #[error("path {path:?} escapes base directory {base:?}")]
    PathEscape { path: PathBuf, base: PathBuf },

    #[error("constructed path exceeds maximum length even after shortening")]
    PathTooLong,

    #[error("network request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("response exceeded maximum size of {max} bytes")]
    TooLarge { max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task-status store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("task-status store worker is unavailable")]
    StoreWorkerGone,

    #[error("download_id {0:?} is already running")]
    AlreadyRunning(String),

    #[error("no task found for download_id {0:?}")]
    TaskNotFound(String),

    #[error("git executable not found on PATH")]
    GitNotFound,

    #[error("git command failed (exit {code:?}): {stderr}")]
    GitFailed { code: Option<i32>, stderr: String },

    #[error("headless browser support was not compiled in (enable the \"browser\" feature)")]
    BrowserUnavailable,

    #[cfg(feature = "browser")]
    #[error("browser automation error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    #[error("index not found for download_id {0:?}")]
    IndexNotFound(String),

    #[error("invalid search request: {0}")]
    InvalidSearch(String),
}
