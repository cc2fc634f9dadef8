//! C4: recursive crawl engine. Drives a [`Fetcher`] across a frontier of
//! `(canonical_url, depth)` pairs with bounded concurrency.
//!
//! Grounded on the teacher's `main.rs::run` worker pool (`Arc<Mutex<Repo>>`,
//! an atomic depth counter, an atomic pending counter, a fixed task count)
//! and `repo.rs::InMemoryRepo`, generalized from marker-based depth
//! bookkeeping to explicit `(url, depth)` frontier items and a real
//! `tokio::sync::Semaphore` concurrency gate.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use url::Url;

use crate::error::Result;
use crate::fetch::{FetchRequest, FetchStatus, Fetcher};
use crate::index::{IndexRecord, IndexWriter};
use crate::robots::RobotsCache;
use crate::url_canon;

pub const DEFAULT_MAX_CONCURRENT_HTTP: usize = 50;
pub const DEFAULT_MAX_CONCURRENT_BROWSER: usize = 4;

pub struct CrawlConfig {
    pub max_depth: u32,
    pub max_concurrent_requests: usize,
    pub force: bool,
    pub max_file_size: u64,
    pub timeout: std::time::Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_HTTP,
            force: false,
            max_file_size: 50 * 1024 * 1024,
            timeout: std::time::Duration::from_secs(30),
        }
    }
}

struct FrontierItem {
    url: Url,
    depth: u32,
}

struct Frontier {
    queue: VecDeque<FrontierItem>,
    visited: HashSet<String>,
}

impl Frontier {
    fn new() -> Self {
        Self { queue: VecDeque::new(), visited: HashSet::new() }
    }

    /// Returns `true` if this is the first time `url` has been seen.
    fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(url.as_str().to_string())
    }

    fn push(&mut self, url: Url, depth: u32) {
        self.queue.push_back(FrontierItem { url, depth });
    }

    fn pop(&mut self) -> Option<FrontierItem> {
        self.queue.pop_front()
    }
}

/// Run a recursive crawl seeded at `seed_url`, writing [`IndexRecord`]s to
/// `index_writer` and fetched bodies under `content_dir`. Returns once the
/// frontier has drained and every in-flight worker has gone idle.
pub async fn crawl(
    seed_url: &str,
    content_dir: &std::path::Path,
    fetcher: Arc<dyn Fetcher>,
    robots: Arc<RobotsCache>,
    index_writer: Arc<IndexWriter>,
    config: CrawlConfig,
) -> Result<()> {
    let seed = url_canon::canonicalize(seed_url)?;

    if url_canon::is_internal(&seed) {
        return Err(crate::error::Error::SsrfBlocked(seed.to_string()));
    }

    let seed_host = seed.host_str().unwrap_or("").to_string();

    let frontier = Arc::new(Mutex::new(Frontier::new()));
    {
        let mut f = frontier.lock().await;
        f.mark_visited(&seed);
        f.push(seed.clone(), 0);
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
    // Counts frontier items that exist but have not finished processing
    // (queued or currently in-flight, including any children a fetch may
    // still enqueue). Reaching zero means the crawl is done: nothing queued,
    // nothing in-flight.
    let outstanding = Arc::new(AtomicUsize::new(1));
    let max_depth = config.max_depth;
    let force = config.force;
    let max_file_size = config.max_file_size;
    let timeout = config.timeout;

    let worker_count = config.max_concurrent_requests.max(1).min(64);
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let frontier = Arc::clone(&frontier);
        let semaphore = Arc::clone(&semaphore);
        let outstanding = Arc::clone(&outstanding);
        let fetcher = Arc::clone(&fetcher);
        let robots = Arc::clone(&robots);
        let index_writer = Arc::clone(&index_writer);
        let content_dir = content_dir.to_path_buf();
        let seed_host = seed_host.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut f = frontier.lock().await;
                    f.pop()
                };

                let Some(item) = item else {
                    if outstanding.load(Ordering::SeqCst) == 0 {
                        return;
                    }
                    tokio::task::yield_now().await;
                    continue;
                };

                let _permit = semaphore.acquire().await;

                process_one(
                    item,
                    &seed_host,
                    max_depth,
                    force,
                    max_file_size,
                    timeout,
                    &content_dir,
                    &frontier,
                    &outstanding,
                    &fetcher,
                    &robots,
                    &index_writer,
                )
                .await;

                outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn process_one(
    item: FrontierItem,
    seed_host: &str,
    max_depth: u32,
    force: bool,
    max_file_size: u64,
    timeout: std::time::Duration,
    content_dir: &std::path::Path,
    frontier: &Arc<Mutex<Frontier>>,
    outstanding: &Arc<AtomicUsize>,
    fetcher: &Arc<dyn Fetcher>,
    robots: &Arc<RobotsCache>,
    index_writer: &Arc<IndexWriter>,
) {
    let url = item.url;
    let original_url = url.to_string();

    if !robots.is_allowed(&url).await {
        let record = IndexRecord::failure(
            &original_url,
            &original_url,
            FetchStatus::FailedRobotstxt,
            "disallowed by robots.txt",
        );
        let _ = index_writer.append(&record).await;
        tracing::info!(url = %url, "blocked by robots.txt");
        return;
    }

    let local_path = match url_canon::url_to_local_path(content_dir, &url) {
        Ok(p) => p,
        Err(e) => {
            let record = IndexRecord::failure(&original_url, &original_url, FetchStatus::Failed, e.to_string());
            let _ = index_writer.append(&record).await;
            return;
        }
    };

    let relative_path = local_path
        .strip_prefix(content_dir)
        .unwrap_or(&local_path)
        .to_string_lossy()
        .replace('\\', "/");

    let request = FetchRequest {
        url: &url,
        target_path: &local_path,
        allowed_base: content_dir,
        force,
        max_size: max_file_size,
        timeout,
    };

    let outcome = match fetcher.fetch(request).await {
        Ok(o) => o,
        Err(e) => {
            let record = IndexRecord::failure(&original_url, &original_url, FetchStatus::Failed, e.to_string());
            let _ = index_writer.append(&record).await;
            tracing::warn!(url = %url, error = %e, "fetch failed");
            return;
        }
    };

    tracing::debug!(url = %url, status = ?outcome.status, "fetch complete");

    let http_status = crate::fetch::http::status_or_none(outcome.http_status);

    let record = match outcome.status {
        FetchStatus::Success => IndexRecord::success(
            &original_url,
            &original_url,
            &relative_path,
            outcome.content_type.clone(),
            outcome.content_md5.clone(),
        )
        .with_http_status(http_status),
        FetchStatus::Skipped => IndexRecord {
            original_url: original_url.clone(),
            canonical_url: original_url.clone(),
            local_path: relative_path.clone(),
            fetch_status: FetchStatus::Skipped,
            http_status: None,
            content_type: None,
            content_md5: None,
            error_message: None,
            timestamp: chrono::Utc::now(),
        },
        other => IndexRecord::failure(
            &original_url,
            &original_url,
            other,
            outcome.error_message.clone().unwrap_or_default(),
        )
        .with_http_status(http_status),
    };
    let _ = index_writer.append(&record).await;

    if outcome.status != FetchStatus::Success || item.depth >= max_depth {
        return;
    }

    let mut f = frontier.lock().await;
    for link in &outcome.detected_links {
        let Ok(resolved) = url.join(link) else { continue };
        let Ok(canonical) = url_canon::canonicalize(resolved.as_str()) else { continue };

        if canonical.host_str() != Some(seed_host) {
            continue;
        }

        if f.mark_visited(&canonical) {
            f.push(canonical, item.depth + 1);
            outstanding.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::http::HttpFetcher;
    use crate::index::read_index;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// `process_one` is exercised directly against a `wiremock::MockServer`
    /// rather than through `crawl()`, since `crawl()`'s own SSRF guard
    /// rejects loopback seeds by design (covered by `url_canon`'s tests).
    async fn harness() -> (Arc<dyn Fetcher>, Arc<RobotsCache>, Arc<IndexWriter>, tempfile::TempDir) {
        let client = reqwest::Client::new();
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(client.clone()));
        let robots = RobotsCache::new(client);
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(IndexWriter::create(dir.path(), "batch").await.unwrap());
        (fetcher, robots, writer, dir)
    }

    #[tokio::test]
    async fn two_hop_crawl_enqueues_same_host_link_and_records_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/next">next</a>"#))
            .mount(&server)
            .await;

        let (fetcher, robots, index_writer, dir) = harness().await;
        let frontier = Arc::new(Mutex::new(Frontier::new()));
        let outstanding = Arc::new(AtomicUsize::new(1));
        let seed_host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

        let url = url::Url::parse(&format!("{}/page", server.uri())).unwrap();
        frontier.lock().await.mark_visited(&url);

        process_one(
            FrontierItem { url, depth: 0 },
            &seed_host,
            5,
            false,
            50 * 1024 * 1024,
            std::time::Duration::from_secs(5),
            dir.path(),
            &frontier,
            &outstanding,
            &fetcher,
            &robots,
            &index_writer,
        )
        .await;

        let mut f = frontier.lock().await;
        let queued = f.pop().expect("link should have been enqueued");
        assert!(queued.url.as_str().ends_with("/next"));
        assert_eq!(queued.depth, 1);
        drop(f);

        let records = read_index(dir.path(), "batch").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fetch_status, FetchStatus::Success);
    }

    #[tokio::test]
    async fn robots_disallowed_url_is_skipped_without_enqueueing_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
            .mount(&server)
            .await;

        let (fetcher, robots, index_writer, dir) = harness().await;
        let frontier = Arc::new(Mutex::new(Frontier::new()));
        let outstanding = Arc::new(AtomicUsize::new(1));
        let seed_host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

        let url = url::Url::parse(&format!("{}/private/page", server.uri())).unwrap();
        frontier.lock().await.mark_visited(&url);

        process_one(
            FrontierItem { url, depth: 0 },
            &seed_host,
            5,
            false,
            50 * 1024 * 1024,
            std::time::Duration::from_secs(5),
            dir.path(),
            &frontier,
            &outstanding,
            &fetcher,
            &robots,
            &index_writer,
        )
        .await;

        assert!(frontier.lock().await.pop().is_none());

        let records = read_index(dir.path(), "batch").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fetch_status, FetchStatus::FailedRobotstxt);
    }

    #[tokio::test]
    async fn links_past_max_depth_are_not_enqueued() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/leaf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/deeper">deeper</a>"#))
            .mount(&server)
            .await;

        let (fetcher, robots, index_writer, dir) = harness().await;
        let frontier = Arc::new(Mutex::new(Frontier::new()));
        let outstanding = Arc::new(AtomicUsize::new(1));
        let seed_host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

        let url = url::Url::parse(&format!("{}/leaf", server.uri())).unwrap();
        frontier.lock().await.mark_visited(&url);

        process_one(
            FrontierItem { url, depth: 2 },
            &seed_host,
            2,
            false,
            50 * 1024 * 1024,
            std::time::Duration::from_secs(5),
            dir.path(),
            &frontier,
            &outstanding,
            &fetcher,
            &robots,
            &index_writer,
        )
        .await;

        assert!(frontier.lock().await.pop().is_none());
    }

    #[tokio::test]
    async fn http_404_is_recorded_as_failed_request_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (fetcher, robots, index_writer, dir) = harness().await;
        let frontier = Arc::new(Mutex::new(Frontier::new()));
        let outstanding = Arc::new(AtomicUsize::new(1));
        let seed_host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

        let url = url::Url::parse(&format!("{}/missing", server.uri())).unwrap();
        frontier.lock().await.mark_visited(&url);

        process_one(
            FrontierItem { url, depth: 0 },
            &seed_host,
            5,
            false,
            50 * 1024 * 1024,
            std::time::Duration::from_secs(5),
            dir.path(),
            &frontier,
            &outstanding,
            &fetcher,
            &robots,
            &index_writer,
        )
        .await;

        let records = read_index(dir.path(), "batch").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fetch_status, FetchStatus::FailedRequest);
        assert_eq!(records[0].http_status, Some(404));
    }
}
