//! Workflow Coordinator: dispatches a validated [`DownloadRequest`] to either
//! (crawl engine, index/task-store) or (git fetcher, index/task-store) and
//! drives the task-status lifecycle around the spawned batch worker.
//!
//! Tagged-request-routed-to-backend shape and lifecycle bookkeeping around a
//! spawned unit of work are grounded on the teacher pack's dispatch module.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::crawler::{self, CrawlConfig, DEFAULT_MAX_CONCURRENT_BROWSER, DEFAULT_MAX_CONCURRENT_HTTP};
use crate::error::Result;
use crate::fetch::http::HttpFetcher;
#[cfg(feature = "browser")]
use crate::fetch::browser::BrowserFetcher;
use crate::fetch::Fetcher;
use crate::git_fetcher;
use crate::index::IndexWriter;
use crate::request::DownloadRequest;
use crate::robots::RobotsCache;
use crate::task_store::{TaskState, TaskStatus, TaskStore};

pub struct Coordinator {
    base: PathBuf,
    task_store: Arc<TaskStore>,
    http_client: reqwest::Client,
}

impl Coordinator {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let task_store = Arc::new(TaskStore::open(&base)?);
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(crate::error::Error::Request)?;
        Ok(Self { base, task_store, http_client })
    }

    pub fn task_store(&self) -> Arc<TaskStore> {
        Arc::clone(&self.task_store)
    }

    fn content_dir(&self, download_id: &str) -> PathBuf {
        self.base.join("content").join(download_id)
    }

    /// Submit a validated request: atomically record it `pending` (refusing
    /// if a batch with the same `download_id` is already running), then hand
    /// the actual work to a spawned task that flips the status to `running`
    /// once it begins and to a terminal state on completion. Returns
    /// immediately with the `download_id`.
    pub async fn submit(&self, request: DownloadRequest) -> Result<String> {
        let download_id = request.download_id().to_string();

        self.task_store.start_batch(&download_id).await?;

        let base = self.base.clone();
        let content_dir = self.content_dir(&download_id);
        let task_store = Arc::clone(&self.task_store);
        let http_client = self.http_client.clone();
        let dl_id = download_id.clone();

        tokio::spawn(async move {
            let _ = task_store.update(&dl_id, TaskState::Running, None, None).await;
            let outcome = run_batch(&base, &content_dir, &dl_id, request, http_client).await;
            match outcome {
                Ok(()) => {
                    let _ = task_store.update(&dl_id, TaskState::Completed, Some("batch completed".to_string()), None).await;
                }
                Err(e) => {
                    let _ = task_store
                        .update(&dl_id, TaskState::Failed, None, Some(e.to_string()))
                        .await;
                }
            }
        });

        Ok(download_id)
    }
}

async fn run_batch(
    base: &Path,
    content_dir: &Path,
    download_id: &str,
    request: DownloadRequest,
    http_client: reqwest::Client,
) -> Result<()> {
    tokio::fs::create_dir_all(content_dir).await.map_err(crate::error::Error::Io)?;
    let index_writer = Arc::new(IndexWriter::create(base, download_id).await?);

    match request {
        DownloadRequest::Git { repo_url, doc_path, force, .. } => {
            git_fetcher::fetch_git(&repo_url, &doc_path, content_dir, force, &index_writer).await
        }
        DownloadRequest::Website { url, depth, force, .. } => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(http_client.clone()));
            let robots = RobotsCache::new(http_client);
            let config = CrawlConfig {
                max_depth: depth,
                max_concurrent_requests: DEFAULT_MAX_CONCURRENT_HTTP,
                force,
                ..CrawlConfig::default()
            };
            crawler::crawl(&url, content_dir, fetcher, robots, index_writer, config).await
        }
        #[cfg(feature = "browser")]
        DownloadRequest::Browser { url, depth, force, .. } => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(BrowserFetcher::new(DEFAULT_MAX_CONCURRENT_BROWSER).await?);
            let robots = RobotsCache::new(http_client);
            let config = CrawlConfig {
                max_depth: depth,
                max_concurrent_requests: DEFAULT_MAX_CONCURRENT_BROWSER,
                force,
                ..CrawlConfig::default()
            };
            crawler::crawl(&url, content_dir, fetcher, robots, index_writer, config).await
        }
        #[cfg(not(feature = "browser"))]
        DownloadRequest::Browser { .. } => Err(crate::error::Error::BrowserUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RawDownloadRequest;

    /// Builds a small local git repository with one Markdown doc, so the
    /// coordinator's git path (C5) can be exercised end to end without
    /// reaching out to a real remote.
    async fn init_local_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            let mut cmd = std::process::Command::new("git");
            cmd.args(args).current_dir(dir);
            cmd.output().expect("git invocation")
        };
        tokio::fs::create_dir_all(dir).await.unwrap();
        tokio::fs::write(dir.join("README.md"), b"# hello\n").await.unwrap();
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn submit_git_request_runs_to_completion_and_indexes_files() {
        let repo_dir = tempfile::tempdir().unwrap();
        init_local_repo(repo_dir.path()).await;

        let base_dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(base_dir.path()).unwrap();
        let task_store = coordinator.task_store();

        let raw = RawDownloadRequest::Git {
            repo_url: repo_dir.path().to_string_lossy().to_string(),
            doc_path: None,
            download_id: Some("local_repo".to_string()),
            force: false,
        };
        let request = DownloadRequest::validate(raw).unwrap();
        let download_id = coordinator.submit(request).await.unwrap();
        assert_eq!(download_id, "local_repo");

        let status = loop {
            let status = task_store.get(&download_id).await.unwrap().unwrap();
            if matches!(status.status, TaskState::Completed | TaskState::Failed) {
                break status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        };

        assert_eq!(status.status, TaskState::Completed);

        let records = crate::index::read_index(base_dir.path(), &download_id).await.unwrap();
        assert!(records.iter().any(|r| r.local_path.ends_with("README.md")));
    }

    #[tokio::test]
    async fn submitting_while_already_running_is_rejected() {
        let base_dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(base_dir.path()).unwrap();
        let task_store = coordinator.task_store();

        task_store
            .insert_or_replace(TaskStatus {
                download_id: "busy".to_string(),
                status: TaskState::Running,
                message: None,
                start_time: Utc::now(),
                end_time: None,
                error_details: None,
            })
            .await
            .unwrap();

        let raw = RawDownloadRequest::Git {
            repo_url: "https://example.com/repo.git".to_string(),
            doc_path: None,
            download_id: Some("busy".to_string()),
            force: false,
        };
        let request = DownloadRequest::validate(raw).unwrap();
        let err = coordinator.submit(request).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::AlreadyRunning(_)));
    }
}
