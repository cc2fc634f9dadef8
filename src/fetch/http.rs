//! C2: HTTP fetcher. A single safe GET with size caps, atomic write, MD5,
//! and link extraction.
//!
//! Request/selector shape is grounded on the teacher's `fetch.rs::fetch_url`
//! and `extract_links`; the atomic temp-file-then-rename write is grounded on
//! `persist_research_result` (`*.tmp` + `rename`, remove tmp on failure).

use std::path::Path;
use std::time::Duration;

use std::sync::LazyLock;

use async_trait::async_trait;
use futures_util::StreamExt;
use md5::{Digest, Md5};
use regex::Regex;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use super::{confine_target, FetchOutcome, FetchRequest, FetchStatus, Fetcher};

/// Matches `href="..."` / `src='...'` attribute values, tolerant of both
/// quote styles; scanned over the first MiB of saved content only.
static LINK_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:href|src)\s*=\s*["']([^"'#]+)"#).unwrap()
});

const LINK_SCAN_BYTES: usize = 1024 * 1024;

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchOutcome> {
        let target_path = confine_target(request.allowed_base, request.target_path)?;

        if target_path.exists() && !request.force {
            return Ok(FetchOutcome::skipped());
        }

        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        let response = match tokio::time::timeout(
            request.timeout,
            self.client.get(request.url.as_str()).send(),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Ok(FetchOutcome::failed_request(e.status(), e.to_string()));
            }
            Err(_) => {
                return Ok(FetchOutcome::failed_request(None, "request timed out"));
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(len) = response.content_length() {
            if len > request.max_size {
                return Ok(FetchOutcome::failed_request(
                    Some(status),
                    format!("Content-Length {len} exceeds max_size {}", request.max_size),
                ));
            }
        }

        if !status.is_success() {
            return Ok(FetchOutcome::failed_request(
                Some(status),
                format!("server returned {status}"),
            ));
        }

        match stream_to_temp(&target_path, response, request.max_size).await {
            Ok((content_md5, body_head)) => {
                if target_path.exists() && !request.force {
                    let tmp_path = tmp_sibling(&target_path);
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Ok(FetchOutcome::skipped());
                }

                let tmp_path = tmp_sibling(&target_path);
                if let Err(e) = tokio::fs::rename(&tmp_path, &target_path).await {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Ok(FetchOutcome::failed(e.to_string()));
                }

                let detected_links = extract_links(&body_head);

                Ok(FetchOutcome {
                    status: FetchStatus::Success,
                    http_status: Some(status),
                    content_md5: Some(content_md5),
                    content_type,
                    detected_links,
                    error_message: None,
                    final_url: Some(final_url),
                })
            }
            Err(StreamError::TooLarge) => Ok(FetchOutcome::failed_request(
                Some(status),
                format!("response exceeded max_size {}", request.max_size),
            )),
            Err(StreamError::Io(e)) => Ok(FetchOutcome::failed(e.to_string())),
        }
    }
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}

enum StreamError {
    TooLarge,
    Io(std::io::Error),
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e)
    }
}

/// Stream the response body to `target_path`'s `.tmp` sibling, hashing
/// incrementally and enforcing `max_size` mid-stream. Returns the hex MD5
/// and up to [`LINK_SCAN_BYTES`] of the body for link extraction.
async fn stream_to_temp(
    target_path: &Path,
    response: reqwest::Response,
    max_size: u64,
) -> std::result::Result<(String, Vec<u8>), StreamError> {
    let tmp_path = tmp_sibling(target_path);
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut hasher = Md5::new();
    let mut written: u64 = 0;
    let mut head = Vec::with_capacity(LINK_SCAN_BYTES.min(64 * 1024));

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(StreamError::Io(std::io::Error::other(e)));
            }
        };

        written += chunk.len() as u64;
        if written > max_size {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StreamError::TooLarge);
        }

        hasher.update(&chunk);
        if head.len() < LINK_SCAN_BYTES {
            let remaining = LINK_SCAN_BYTES - head.len();
            head.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    drop(file);

    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    Ok((hex, head))
}

/// Extract candidate `href=`/`src=` link targets from the first MiB of a
/// fetched document, filtering out non-navigable schemes and fragments.
pub(crate) fn extract_links(body_head: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(body_head);
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for cap in LINK_ATTR_RE.captures_iter(&text) {
        let raw = cap[1].trim();
        if raw.is_empty() {
            continue;
        }
        let lower = raw.to_lowercase();
        if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("data:") {
            continue;
        }
        if seen.insert(raw.to_string()) {
            links.push(raw.to_string());
        }
    }

    links
}

pub(crate) fn status_or_none(status: Option<StatusCode>) -> Option<u16> {
    status.map(|s| s.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_filters_non_navigable_schemes_and_dedupes() {
        let html = br#"
            <a href="https://example.com/a">a</a>
            <a href="https://example.com/a">dup</a>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:me@example.com">mail</a>
            <img src="data:image/png;base64,xxx">
            <a href="/relative#frag">rel</a>
        "#;
        let links = extract_links(html);
        assert!(links.contains(&"https://example.com/a".to_string()));
        assert_eq!(links.iter().filter(|l| l.contains("example.com/a")).count(), 1);
        assert!(!links.iter().any(|l| l.starts_with("javascript:")));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
        assert!(!links.iter().any(|l| l.starts_with("data:")));
    }
}
