//! `ContentBlock` extraction for the advanced (code/JSON) extractor, §4.7.
//!
//! Markdown fenced-code extraction is grounded on `pulldown-cmark`'s offset
//! iterator (paired with `scraper` in the retrieval pack's
//! `danielchristiancazares-forge` manifest for exactly this HTML/Markdown
//! block-splitting need). HTML code/JSON extraction reuses `scraper`
//! selectors the same way `text.rs` does for plain text.
//!
//! No single teacher file covers block-typed code/JSON extraction; the
//! text/code/json split here follows the distilled spec's `ContentBlock`
//! shape directly (flagged in DESIGN.md rather than attributed to a source
//! that doesn't exist).

use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Code,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub kind: BlockKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    pub source_url: String,
    pub metadata: Value,
}

impl ContentBlock {
    fn text(content: String, block_type: &str, source_url: &str, start_line: Option<usize>, end_line: Option<usize>) -> Self {
        Self {
            kind: BlockKind::Text,
            content,
            language: None,
            block_type: block_type.to_string(),
            start_line,
            end_line,
            source_url: source_url.to_string(),
            metadata: Value::Null,
        }
    }

    fn code(content: String, language: Option<String>, block_type: &str, source_url: &str, start_line: Option<usize>, end_line: Option<usize>) -> Self {
        Self {
            kind: BlockKind::Code,
            content,
            language,
            block_type: block_type.to_string(),
            start_line,
            end_line,
            source_url: source_url.to_string(),
            metadata: Value::Null,
        }
    }

    fn json(content: String, block_type: &str, source_url: &str, start_line: Option<usize>, end_line: Option<usize>) -> Self {
        Self {
            kind: BlockKind::Json,
            content,
            language: None,
            block_type: block_type.to_string(),
            start_line,
            end_line,
            source_url: source_url.to_string(),
            metadata: Value::Null,
        }
    }
}

/// Classify a would-be code block: valid, object/array-shaped JSON is
/// reported as a `Json` block instead, matching the spec's `{text, code,
/// json}` block taxonomy (a fenced ```json block is JSON, not code).
fn classify_fenced(content: String, language: Option<String>, source_url: &str, start: Option<usize>, end: Option<usize>) -> ContentBlock {
    let trimmed = content.trim_start();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
    if looks_like_json && serde_json::from_str::<Value>(&content).is_ok() {
        ContentBlock::json(content, "fenced_json", source_url, start, end)
    } else {
        ContentBlock::code(content, language, "fenced_code", source_url, start, end)
    }
}

fn line_of(content: &str, byte_offset: usize) -> usize {
    1 + content[..byte_offset.min(content.len())].matches('\n').count()
}

/// Split Markdown (and, as a lenient approximation, reST/plain text) into
/// text and fenced-code/JSON blocks using `pulldown-cmark`'s offset iterator
/// for line numbers.
pub fn parse_markdown_blocks(content: &str, source_url: &str) -> Vec<ContentBlock> {
    let parser = Parser::new_ext(content, Options::empty()).into_offset_iter();

    let mut blocks = Vec::new();
    let mut in_code = false;
    let mut code_lang: Option<String> = None;
    let mut code_buf = String::new();
    let mut code_start: Option<usize> = None;
    let mut code_end: Option<usize> = None;
    let mut text_buf = String::new();
    let mut text_start: Option<usize> = None;
    let mut text_end: Option<usize> = None;

    let flush_text = |blocks: &mut Vec<ContentBlock>, buf: &mut String, start: &mut Option<usize>, end: &mut Option<usize>| {
        if !buf.trim().is_empty() {
            blocks.push(ContentBlock::text(buf.trim().to_string(), "paragraph", source_url, *start, *end));
        }
        buf.clear();
        *start = None;
        *end = None;
    };

    for (event, range) in parser {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                flush_text(&mut blocks, &mut text_buf, &mut text_start, &mut text_end);
                in_code = true;
                code_lang = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
                code_buf.clear();
                code_start = Some(line_of(content, range.start));
            }
            Event::End(TagEnd::CodeBlock) => {
                code_end = Some(line_of(content, range.end));
                blocks.push(classify_fenced(code_buf.clone(), code_lang.take(), source_url, code_start, code_end));
                code_buf.clear();
                in_code = false;
            }
            Event::Text(t) | Event::Code(t) => {
                if in_code {
                    code_buf.push_str(&t);
                } else {
                    if text_start.is_none() {
                        text_start = Some(line_of(content, range.start));
                    }
                    text_end = Some(line_of(content, range.end));
                    text_buf.push_str(&t);
                    text_buf.push(' ');
                }
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Item) => {
                flush_text(&mut blocks, &mut text_buf, &mut text_start, &mut text_end);
            }
            _ => {}
        }
    }
    flush_text(&mut blocks, &mut text_buf, &mut text_start, &mut text_end);

    blocks
}

static PRE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("pre").unwrap());
static CODE_CHILD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("code").unwrap());
static JSON_SCRIPT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"script[type="application/json"]"#).unwrap());

/// Split HTML into one whole-document text block (reusing the same
/// script/style-stripping extraction as phase 2) plus one block per `<pre>`
/// or `application/json` `<script>` element. The advanced extractor's job is
/// distinguishing code/JSON from prose, not per-paragraph text granularity,
/// so general body text stays a single block.
pub fn parse_html_blocks(html: &str, source_url: &str) -> Vec<ContentBlock> {
    let document = Html::parse_document(html);
    let mut blocks = Vec::new();

    let extracted = super::text::extract_text("html", html);
    if !extracted.text.trim().is_empty() {
        blocks.push(ContentBlock::text(extracted.text, "document_text", source_url, None, None));
    }

    for pre in document.select(&PRE_SEL) {
        let language = pre
            .select(&CODE_CHILD_SEL)
            .next()
            .and_then(|code| code.value().attr("class"))
            .and_then(|classes| {
                classes
                    .split_whitespace()
                    .find_map(|c| c.strip_prefix("language-"))
                    .map(|s| s.to_string())
            });
        let text = pre.text().collect::<String>();
        if text.trim().is_empty() {
            continue;
        }
        blocks.push(classify_fenced(text, language, source_url, None, None));
    }

    for script in document.select(&JSON_SCRIPT_SEL) {
        let text = script.text().collect::<String>();
        if text.trim().is_empty() {
            continue;
        }
        blocks.push(ContentBlock::json(text, "json_script", source_url, None, None));
    }

    blocks
}

/// Parse `content` (already read from `extension`'s file) into
/// `ContentBlock`s for the advanced extractor.
pub fn parse_blocks(extension: &str, content: &str, source_url: &str) -> Vec<ContentBlock> {
    match extension.to_lowercase().as_str() {
        "html" | "htm" | "xml" => parse_html_blocks(content, source_url),
        "json" => match serde_json::from_str::<Value>(content) {
            Ok(_) => vec![ContentBlock::json(content.to_string(), "document_json", source_url, None, None)],
            Err(_) => vec![ContentBlock::text(content.to_string(), "document_text", source_url, None, None)],
        },
        _ => parse_markdown_blocks(content, source_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_splits_fenced_code_from_prose() {
        let md = "# Title\n\nSome prose here.\n\n```rust\nfn main() {}\n```\n\nMore prose.\n";
        let blocks = parse_markdown_blocks(md, "http://example.com/doc.md");
        let code = blocks.iter().find(|b| b.kind == BlockKind::Code).unwrap();
        assert_eq!(code.language.as_deref(), Some("rust"));
        assert!(code.content.contains("fn main"));
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Text && b.content.contains("Some prose")));
    }

    #[test]
    fn markdown_fenced_json_is_classified_as_json_not_code() {
        let md = "```json\n{\"a\": 1}\n```\n";
        let blocks = parse_markdown_blocks(md, "http://example.com/doc.md");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Json);
    }

    #[test]
    fn html_pre_code_becomes_code_block_with_language() {
        let html = r#"<html><body><p>intro</p><pre><code class="language-python">print(1)</code></pre></body></html>"#;
        let blocks = parse_html_blocks(html, "http://example.com/page");
        let code = blocks.iter().find(|b| b.kind == BlockKind::Code).unwrap();
        assert_eq!(code.language.as_deref(), Some("python"));
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Text && b.content.contains("intro")));
    }
}
