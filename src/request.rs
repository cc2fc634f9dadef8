//! `DownloadRequest`: the tagged shape accepted by the workflow coordinator,
//! plus the field-validation and `download_id` sanitization rules of spec
//! §6.
//!
//! Validate-then-construct idiom (parse raw fields, reject early with a
//! descriptive error, only then build the typed value) grounded on
//! `WebFetchInput::new` from the retrieval pack's webfetch tool types.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::url_canon;

const DEFAULT_CRAWL_DEPTH: u32 = 5;

static ID_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Raw request shape as accepted from a caller (HTTP/CLI adapter, out of
/// scope here) before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RawDownloadRequest {
    Git {
        repo_url: String,
        #[serde(default)]
        doc_path: Option<String>,
        #[serde(default)]
        download_id: Option<String>,
        #[serde(default)]
        force: bool,
    },
    Website {
        url: String,
        #[serde(default)]
        depth: Option<u32>,
        #[serde(default)]
        download_id: Option<String>,
        #[serde(default)]
        force: bool,
    },
    Browser {
        url: String,
        #[serde(default)]
        depth: Option<u32>,
        #[serde(default)]
        download_id: Option<String>,
        #[serde(default)]
        force: bool,
    },
}

/// Validated, sanitized request ready for the workflow coordinator.
#[derive(Debug, Clone)]
pub enum DownloadRequest {
    Git { repo_url: String, doc_path: String, download_id: String, force: bool },
    Website { url: String, depth: u32, download_id: String, force: bool },
    Browser { url: String, depth: u32, download_id: String, force: bool },
}

impl DownloadRequest {
    pub fn download_id(&self) -> &str {
        match self {
            DownloadRequest::Git { download_id, .. } => download_id,
            DownloadRequest::Website { download_id, .. } => download_id,
            DownloadRequest::Browser { download_id, .. } => download_id,
        }
    }

    /// Validate a raw request per spec §6 and sanitize/default its fields.
    pub fn validate(raw: RawDownloadRequest) -> Result<Self> {
        Ok(match raw {
            RawDownloadRequest::Git { repo_url, doc_path, download_id, force } => {
                if repo_url.trim().is_empty() {
                    return Err(Error::InvalidRequest("repo_url is required for kind=git".to_string()));
                }
                let doc_path = doc_path.unwrap_or_default();
                let download_id = resolve_download_id(download_id, &repo_url)?;
                DownloadRequest::Git { repo_url, doc_path, download_id, force }
            }
            RawDownloadRequest::Website { url, depth, download_id, force } => {
                if url.trim().is_empty() {
                    return Err(Error::InvalidRequest("url is required for kind=website".to_string()));
                }
                let canonical = url_canon::canonicalize(&url)?;
                if url_canon::is_internal(&canonical) {
                    return Err(Error::SsrfBlocked(canonical.to_string()));
                }
                let depth = depth.unwrap_or(DEFAULT_CRAWL_DEPTH);
                let download_id = resolve_download_id(download_id, &url)?;
                DownloadRequest::Website { url, depth, download_id, force }
            }
            RawDownloadRequest::Browser { url, depth, download_id, force } => {
                if url.trim().is_empty() {
                    return Err(Error::InvalidRequest("url is required for kind=browser".to_string()));
                }
                let canonical = url_canon::canonicalize(&url)?;
                if url_canon::is_internal(&canonical) {
                    return Err(Error::SsrfBlocked(canonical.to_string()));
                }
                let depth = depth.unwrap_or(DEFAULT_CRAWL_DEPTH);
                let download_id = resolve_download_id(download_id, &url)?;
                DownloadRequest::Browser { url, depth, download_id, force }
            }
        })
    }
}

/// Sanitize a caller-supplied `download_id` (any run of characters outside
/// `[A-Za-z0-9_-]` becomes `_`; empty result falls back to `dl_<8 hex>`), or
/// derive one deterministically from the seed URL when the caller omitted
/// it entirely.
fn resolve_download_id(caller_supplied: Option<String>, seed: &str) -> Result<String> {
    match caller_supplied {
        Some(raw) => Ok(sanitize_download_id(&raw)),
        None => url_canon::generate_batch_id(seed).map(|id| format!("dl_{id}")),
    }
}

pub fn sanitize_download_id(raw: &str) -> String {
    let cleaned = ID_DISALLOWED.replace_all(raw, "_").to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        format!("dl_{}", random_suffix())
    } else {
        cleaned
    }
}

/// 8 hex characters derived from the current time and a process-local
/// counter — not cryptographic, just enough entropy to avoid collisions
/// among fallback IDs minted by one process.
fn random_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:08x}", (nanos ^ seq.wrapping_mul(0x9E37_79B9)) & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_requires_repo_url() {
        let raw = RawDownloadRequest::Git { repo_url: String::new(), doc_path: None, download_id: None, force: false };
        assert!(DownloadRequest::validate(raw).is_err());
    }

    #[test]
    fn website_defaults_depth_and_id() {
        let raw = RawDownloadRequest::Website {
            url: "https://example.com/".to_string(),
            depth: None,
            download_id: None,
            force: false,
        };
        let req = DownloadRequest::validate(raw).unwrap();
        match req {
            DownloadRequest::Website { depth, download_id, .. } => {
                assert_eq!(depth, DEFAULT_CRAWL_DEPTH);
                assert!(download_id.starts_with("dl_"));
            }
            _ => panic!("expected Website variant"),
        }
    }

    #[test]
    fn website_rejects_internal_seed() {
        let raw = RawDownloadRequest::Website {
            url: "http://127.0.0.1/".to_string(),
            depth: None,
            download_id: None,
            force: false,
        };
        assert!(matches!(DownloadRequest::validate(raw), Err(Error::SsrfBlocked(_))));
    }

    #[test]
    fn sanitize_download_id_replaces_disallowed_chars() {
        assert_eq!(sanitize_download_id("my id!@#123"), "my_id_123");
    }

    #[test]
    fn sanitize_download_id_falls_back_when_fully_disallowed() {
        let sanitized = sanitize_download_id("!!!");
        assert!(sanitized.starts_with("dl_"));
    }

    #[test]
    fn wire_payload_rejects_fields_disallowed_for_its_kind() {
        let payload = r#"{"kind":"git","repo_url":"https://example.com/repo.git","url":"https://example.com"}"#;
        let err = serde_json::from_str::<RawDownloadRequest>(payload).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
