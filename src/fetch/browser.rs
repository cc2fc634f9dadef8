//! C3: headless-browser fetcher. Same [`FetchOutcome`] contract as C2, via a
//! Chrome DevTools Protocol session.
//!
//! Dependency choice (`chromiumoxide`, `tokio-runtime` feature) and the
//! navigation/wait-for-load idiom are grounded on the retrieval pack's
//! headless-browser automation manifests; link extraction reuses the C2
//! regex scan over the serialized HTML.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, SetBlockedUrLsParams};
use futures_util::StreamExt;
use md5::{Digest, Md5};
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use super::{confine_target, FetchOutcome, FetchRequest, FetchStatus, Fetcher};
use crate::error::{Error, Result};

/// URL glob patterns for non-essential resource types (images, media, fonts,
/// stylesheets) blocked per the spec's "non-essential resource types are
/// blocked" requirement.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico",
    "*.mp4", "*.webm", "*.mp3", "*.ogg", "*.wav",
    "*.woff", "*.woff2", "*.ttf", "*.otf",
    "*.css",
];

pub struct BrowserFetcher {
    browser: Arc<Browser>,
    /// Caps concurrent contexts; each in-flight fetch owns one page.
    concurrency: Arc<Semaphore>,
    _handler: tokio::task::JoinHandle<()>,
}

impl BrowserFetcher {
    /// Launch a single shared browser instance for the batch. `max_concurrent`
    /// is typically small (spec default 4) since each fetch owns a context.
    pub async fn new(max_concurrent: usize) -> Result<Self> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(Error::InvalidRequest)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::task::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Arc::new(browser),
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
            _handler: handler_task,
        })
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchOutcome> {
        let target_path = confine_target(request.allowed_base, request.target_path)?;

        if target_path.exists() && !request.force {
            return Ok(FetchOutcome::skipped());
        }

        let _permit = self.concurrency.acquire().await.map_err(|_| Error::StoreWorkerGone)?;

        let fetch_result = tokio::time::timeout(request.timeout, self.navigate_and_extract(request.url)).await;

        let (html, final_url, http_status) = match fetch_result {
            Ok(Ok(triple)) => triple,
            Ok(Err(e)) => return Ok(FetchOutcome::failed_request(None, e.to_string())),
            Err(_) => return Ok(FetchOutcome::failed_request(None, "navigation timed out")),
        };

        if let Some(status) = http_status {
            if !status.is_success() {
                return Ok(FetchOutcome::failed_request(Some(status), format!("server returned {status}")));
            }
        }

        if html.as_bytes().len() as u64 > request.max_size {
            return Ok(FetchOutcome::failed_request(
                None,
                format!("rendered document exceeded max_size {}", request.max_size),
            ));
        }

        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        if target_path.exists() && !request.force {
            return Ok(FetchOutcome::skipped());
        }

        match write_atomically(&target_path, html.as_bytes()).await {
            Ok(content_md5) => {
                let detected_links = super::http::extract_links(html.as_bytes());
                Ok(FetchOutcome {
                    status: FetchStatus::Success,
                    http_status,
                    content_md5: Some(content_md5),
                    content_type: Some("text/html".to_string()),
                    detected_links,
                    error_message: None,
                    final_url: Some(final_url),
                })
            }
            Err(e) => Ok(FetchOutcome::failed(e.to_string())),
        }
    }
}

impl BrowserFetcher {
    /// Navigates to `url` and returns the rendered HTML, the final URL after
    /// any client-side redirect, and the main document's HTTP status (read
    /// off the CDP `Network.responseReceived` event for that URL, since
    /// `chromiumoxide`'s page API exposes no navigation-result object).
    async fn navigate_and_extract(&self, url: &url::Url) -> Result<(String, String, Option<StatusCode>)> {
        let page = self.browser.new_page(url.as_str()).await?;

        let blocked = SetBlockedUrLsParams {
            urls: BLOCKED_URL_PATTERNS.iter().map(|s| s.to_string()).collect(),
        };
        if let Err(e) = page.execute(blocked).await {
            tracing::warn!(error = %e, "failed to install resource-blocking rule");
        }

        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let target = url.as_str().to_string();

        page.wait_for_navigation().await?;

        let mut http_status = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), responses.next()).await {
            if event.response.url == target {
                http_status = StatusCode::from_u16(event.response.status as u16).ok();
                break;
            }
        }

        let html = page.content().await?;
        let final_url = page.url().await?.unwrap_or_else(|| url.to_string());
        let _ = page.close().await;

        Ok((html, final_url, http_status))
    }
}

async fn write_atomically(target_path: &Path, bytes: &[u8]) -> std::io::Result<String> {
    use tokio::io::AsyncWriteExt;

    let mut tmp = target_path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, target_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    let mut hasher = Md5::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
