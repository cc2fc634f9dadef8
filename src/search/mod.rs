//! C7: two-phase searcher. Phase 1 materializes and filters a batch's index;
//! phase 2 keeps only files whose extracted text contains every scan
//! keyword; phase 3 extracts a snippet per the requested selector. The
//! optional advanced extractor (`advanced_search`) additionally splits each
//! surviving file into code/JSON/text [`ContentBlock`]s and matches at that
//! granularity.
//!
//! Text-extraction plumbing is grounded on the teacher's `scraper`-based
//! `Html::parse_document`/`Selector` usage in `crawler.rs`, generalized into
//! a dedicated module (see `text.rs`).

pub mod advanced;
pub mod blocks;
pub mod text;

pub use advanced::{JsonMatchInfo, JsonSearchMode};
pub use blocks::{BlockKind, ContentBlock};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fetch::FetchStatus;
use crate::index;
use crate::url_canon;

/// Extensions a file must carry to be considered by the searcher at all,
/// per spec §4.7 phase 1.
const SEARCHABLE_EXTENSIONS: &[&str] = &["html", "htm", "md", "rst", "txt", "json", "xml"];
const PREVIEW_LEN: usize = 500;
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub download_id: String,
    pub scan_keywords: Vec<String>,
    pub extract_selector: String,
    pub extract_keywords: Vec<String>,
    pub limit: usize,
}

impl SearchRequest {
    /// Validate a search request per spec §6: `scan_keywords` and
    /// `extract_selector` non-empty, `limit` defaults to 10 and must be > 0.
    pub fn validate(
        download_id: impl Into<String>,
        scan_keywords: Vec<String>,
        extract_selector: impl Into<String>,
        extract_keywords: Vec<String>,
        limit: Option<usize>,
    ) -> Result<Self> {
        if scan_keywords.is_empty() {
            return Err(Error::InvalidSearch("scan_keywords must contain at least one keyword".to_string()));
        }
        let extract_selector = extract_selector.into();
        if extract_selector.trim().is_empty() {
            return Err(Error::InvalidSearch("extract_selector must be non-empty".to_string()));
        }
        let limit = match limit {
            Some(0) => return Err(Error::InvalidSearch("limit must be greater than zero".to_string())),
            Some(n) => n,
            None => DEFAULT_LIMIT,
        };
        Ok(Self { download_id: download_id.into(), scan_keywords, extract_selector, extract_keywords, limit })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub original_url: String,
    /// Relative to the batch content root.
    pub local_path: String,
    pub content_preview: String,
    pub match_details: String,
    pub selector_matched: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_block: Option<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_block_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_match_info: Option<JsonMatchInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdvancedOptions {
    pub json_mode: JsonSearchMode,
    pub code_block_priority: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self { json_mode: JsonSearchMode::Structure, code_block_priority: false }
    }
}

struct Candidate {
    absolute_path: PathBuf,
    relative_path: String,
    original_url: String,
    extension: String,
}

/// Phase 1: read the batch index, keep only `success` records whose local
/// path resolves to an existing file under the batch content root with a
/// searchable extension.
async fn gather_candidates(base: &Path, download_id: &str) -> Result<Vec<Candidate>> {
    let records = index::read_index(base, download_id).await?;
    let content_root = base.join("content").join(download_id);

    let mut candidates = Vec::new();
    for record in records {
        if record.fetch_status != FetchStatus::Success {
            continue;
        }
        let joined = content_root.join(&record.local_path);
        let Ok(confined) = url_canon::confine(&content_root, &joined) else { continue };
        if !confined.is_file() {
            continue;
        }
        let Some(extension) = confined.extension().and_then(|e| e.to_str()).map(str::to_lowercase) else {
            continue;
        };
        if !SEARCHABLE_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }
        candidates.push(Candidate {
            absolute_path: confined,
            relative_path: record.local_path,
            original_url: record.original_url,
            extension,
        });
    }
    Ok(candidates)
}

async fn read_lossy(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(Error::Io)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn all_keywords_present(haystack: &str, keywords: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    keywords.iter().all(|k| lower.contains(&k.to_lowercase()))
}

fn preview(snippet: &str) -> String {
    if snippet.chars().count() <= PREVIEW_LEN {
        snippet.to_string()
    } else {
        let truncated: String = snippet.chars().take(PREVIEW_LEN).collect();
        format!("{truncated}...")
    }
}

/// Phases 2 and 3: keyword-filter the candidates, then extract a snippet per
/// `request.extract_selector` and apply `extract_keywords` as a second
/// all-must-match filter against the snippet.
pub async fn basic_search(base: &Path, request: &SearchRequest) -> Result<Vec<SearchResultItem>> {
    let candidates = gather_candidates(base, &request.download_id).await?;
    let selector_is_title = request.extract_selector.eq_ignore_ascii_case("title");

    let mut results = Vec::with_capacity(request.limit.min(candidates.len()));
    for candidate in candidates {
        if results.len() >= request.limit {
            break;
        }

        let Ok(content) = read_lossy(&candidate.absolute_path).await else { continue };
        let extracted = text::extract_text(&candidate.extension, &content);

        if !all_keywords_present(&extracted.text, &request.scan_keywords) {
            continue;
        }

        let snippet = if selector_is_title {
            extracted.title.unwrap_or(extracted.text)
        } else {
            extracted.text
        };

        if !all_keywords_present(&snippet, &request.extract_keywords) {
            continue;
        }

        results.push(SearchResultItem {
            original_url: candidate.original_url,
            local_path: candidate.relative_path,
            content_preview: preview(&snippet),
            match_details: snippet,
            selector_matched: request.extract_selector.clone(),
            content_block: None,
            code_block_score: None,
            json_match_info: None,
            search_context: None,
        });
    }

    Ok(results)
}

/// Optional advanced extractor: parse each keyword-surviving candidate into
/// [`ContentBlock`]s and match at block granularity instead of whole-file
/// text. Code/JSON blocks carry their own match rules (§4.7); results are
/// ranked by `options.code_block_priority` then descending score.
pub async fn advanced_search(
    base: &Path,
    request: &SearchRequest,
    options: &AdvancedOptions,
) -> Result<Vec<SearchResultItem>> {
    let candidates = gather_candidates(base, &request.download_id).await?;
    let selector_is_title = request.extract_selector.eq_ignore_ascii_case("title");

    let mut scored: Vec<(bool, f64, SearchResultItem)> = Vec::new();

    for candidate in candidates {
        let Ok(content) = read_lossy(&candidate.absolute_path).await else { continue };
        let parsed_blocks = blocks::parse_blocks(&candidate.extension, &content, &candidate.original_url);

        for block in parsed_blocks {
            let (is_code, score, json_info) = match block.kind {
                BlockKind::Json => match advanced::json_block_match(
                    &block,
                    &request.scan_keywords,
                    &request.extract_keywords,
                    options.json_mode,
                ) {
                    Some(info) => (false, 1.0, Some(info)),
                    None => continue,
                },
                BlockKind::Code => {
                    match advanced::code_block_score(&block, &request.scan_keywords, &request.extract_keywords) {
                        Some(score) => (true, score, None),
                        None => continue,
                    }
                }
                BlockKind::Text => {
                    if !advanced::text_block_match(&block, &request.scan_keywords, &request.extract_keywords) {
                        continue;
                    }
                    (false, 0.0, None)
                }
            };

            let title = if selector_is_title {
                text::extract_text(&candidate.extension, &content).title
            } else {
                None
            };
            let snippet = title.unwrap_or_else(|| block.content.clone());

            scored.push((
                is_code,
                score,
                SearchResultItem {
                    original_url: candidate.original_url.clone(),
                    local_path: candidate.relative_path.clone(),
                    content_preview: preview(&snippet),
                    match_details: snippet,
                    selector_matched: request.extract_selector.clone(),
                    code_block_score: is_code.then_some(score),
                    json_match_info: json_info,
                    search_context: Some(block.block_type.clone()),
                    content_block: Some(block),
                },
            ));
        }
    }

    if options.code_block_priority {
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.total_cmp(&a.1)));
    } else {
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    }

    Ok(scored.into_iter().take(request.limit).map(|(_, _, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexRecord, IndexWriter};

    async fn write_batch(dir: &Path, download_id: &str, files: &[(&str, &str)]) {
        let content_root = dir.join("content").join(download_id);
        tokio::fs::create_dir_all(&content_root).await.unwrap();
        let writer = IndexWriter::create(dir, download_id).await.unwrap();

        for (name, body) in files {
            let path = content_root.join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(&path, body).await.unwrap();
            writer
                .append(&IndexRecord::success(
                    format!("http://example.com/{name}"),
                    format!("http://example.com/{name}"),
                    *name,
                    Some("text/html".to_string()),
                    None,
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn title_selector_returns_trimmed_title() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path(),
            "batch1",
            &[("index.html", "<html><head><title>Example Domain</title></head><body>hi</body></html>")],
        )
        .await;

        let request = SearchRequest::validate("batch1", vec!["Example".to_string(), "Domain".to_string()], "title", vec![], None).unwrap();
        let results = basic_search(dir.path(), &request).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].selector_matched, "title");
        assert!(results[0].match_details.contains("Example Domain"));
    }

    #[tokio::test]
    async fn scan_keywords_all_must_match() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path(),
            "batch2",
            &[
                ("a.html", "<html><body>alpha beta</body></html>"),
                ("b.html", "<html><body>alpha only</body></html>"),
            ],
        )
        .await;

        let request = SearchRequest::validate("batch2", vec!["alpha".to_string(), "beta".to_string()], "body", vec![], None).unwrap();
        let results = basic_search(dir.path(), &request).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].local_path.contains("a.html"));
    }

    #[tokio::test]
    async fn missing_index_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = SearchRequest::validate("nope", vec!["x".to_string()], "title", vec![], None).unwrap();
        let err = basic_search(dir.path(), &request).await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn limit_truncates_results_in_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path(),
            "batch3",
            &[
                ("a.txt", "needle one"),
                ("b.txt", "needle two"),
                ("c.txt", "needle three"),
            ],
        )
        .await;

        let request = SearchRequest::validate("batch3", vec!["needle".to_string()], "body", vec![], Some(2)).unwrap();
        let results = basic_search(dir.path(), &request).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn advanced_search_matches_code_block_requiring_all_keywords() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path(),
            "batch4",
            &[("doc.md", "# Guide\n\nSee below.\n\n```rust\nfn retry_request() {}\n```\n")],
        )
        .await;

        let request = SearchRequest::validate("batch4", vec!["retry_request".to_string()], "body", vec![], None).unwrap();
        let results = advanced_search(dir.path(), &request, &AdvancedOptions::default()).await.unwrap();

        assert!(results.iter().any(|r| r.code_block_score.is_some()));
    }

    #[tokio::test]
    async fn advanced_search_code_priority_sorts_code_before_text() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            dir.path(),
            "batch5",
            &[("doc.md", "widget appears here in prose.\n\n```text\nwidget\n```\n")],
        )
        .await;

        let request = SearchRequest::validate("batch5", vec!["widget".to_string()], "body", vec![], None).unwrap();
        let options = AdvancedOptions { code_block_priority: true, ..AdvancedOptions::default() };
        let results = advanced_search(dir.path(), &request, &options).await.unwrap();

        assert!(!results.is_empty());
        assert!(results[0].content_block.as_ref().unwrap().kind == BlockKind::Code);
    }
}
