//! C2/C3 shared contract: a single safe fetch of one URL to one local path.
//!
//! Generalizes the teacher's free functions (`fetch_url`, `extract_links`)
//! into a capability trait so the crawl engine (C4) can be generic over an
//! HTTP or a headless-browser backend, per the Design Note on dynamic
//! dispatch over fetchers.

pub mod http;

#[cfg(feature = "browser")]
pub mod browser;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wire status for one fetch attempt (`IndexRecord::fetch_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Skipped,
    FailedRequest,
    FailedRobotstxt,
    Failed,
}

/// Outcome of a single fetch, as returned across the C2/C3 boundary to the
/// crawl engine. Carries a real `StatusCode` (not just `u16`) for same-host
/// redirect bookkeeping; this is converted to the plain wire form
/// (`http_status: Option<u16>`) when written into an `IndexRecord`.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub http_status: Option<StatusCode>,
    pub content_md5: Option<String>,
    pub content_type: Option<String>,
    /// Links exactly as they appeared in markup (`href=`/`src=`), not yet
    /// resolved against the page's URL.
    pub detected_links: Vec<String>,
    pub error_message: Option<String>,
    /// Final URL after following redirects, used by the crawler for
    /// same-host membership checks; never written to `canonical_url`.
    pub final_url: Option<String>,
}

impl FetchOutcome {
    pub fn skipped() -> Self {
        Self {
            status: FetchStatus::Skipped,
            http_status: None,
            content_md5: None,
            content_type: None,
            detected_links: Vec::new(),
            error_message: None,
            final_url: None,
        }
    }

    pub fn failed_request(http_status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::FailedRequest,
            http_status,
            content_md5: None,
            content_type: None,
            detected_links: Vec::new(),
            error_message: Some(message.into()),
            final_url: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Failed,
            http_status: None,
            content_md5: None,
            content_type: None,
            detected_links: Vec::new(),
            error_message: Some(message.into()),
            final_url: None,
        }
    }
}

/// Arguments shared by every fetch backend. `allowed_base` confines
/// `target_path`; a fetch that would escape it is rejected before any I/O.
pub struct FetchRequest<'a> {
    pub url: &'a url::Url,
    pub target_path: &'a Path,
    pub allowed_base: &'a Path,
    pub force: bool,
    pub max_size: u64,
    pub timeout: std::time::Duration,
}

/// Capability exposed by both the HTTP fetcher (C2) and the browser fetcher
/// (C3). The crawl engine is generic over this trait so it can drive either
/// backend identically.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchOutcome>;
}

/// Resolve `target_path` and reject it unless it stays under `allowed_base`.
/// Shared by every backend so the confinement check is applied identically.
pub(crate) fn confine_target(allowed_base: &Path, target_path: &Path) -> Result<PathBuf> {
    crate::url_canon::confine(allowed_base, target_path)
}
