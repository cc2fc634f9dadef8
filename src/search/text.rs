//! Plain-text extraction used by phase 2 (keyword scan) and phase 3
//! (selector extraction) of the searcher.
//!
//! HTML/XML text extraction walks the parsed tree directly (rather than
//! `ElementRef::text()` on the root, which would also yield `<script>`/
//! `<style>` contents) so those subtrees never leak into the scanned text,
//! per spec §4.7.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::node::Node;
use scraper::{Html, Selector};

static SCRIPT_STYLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script, style").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

pub struct ExtractedText {
    pub text: String,
    pub title: Option<String>,
}

/// Dispatch text extraction by the searchable file extension (already
/// validated against the fixed set in phase 1).
pub fn extract_text(extension: &str, content: &str) -> ExtractedText {
    match extension.to_lowercase().as_str() {
        "html" | "htm" | "xml" => extract_markup_text(content),
        _ => ExtractedText { text: content.to_string(), title: None },
    }
}

/// Parse `markup` and concatenate all text nodes outside `<script>`/`<style>`
/// subtrees, including the `<title>` element's text.
fn extract_markup_text(markup: &str) -> ExtractedText {
    let document = Html::parse_document(markup);

    let title = document
        .select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let skip_ids: HashSet<_> = document.select(&SCRIPT_STYLE_SEL).map(|el| el.id()).collect();

    let mut parts = Vec::new();
    for node_ref in document.tree.nodes() {
        if let Node::Text(text) = node_ref.value() {
            if node_ref.ancestors().any(|a| skip_ids.contains(&a.id())) {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }

    ExtractedText { text: parts.join(" "), title }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style_but_keeps_title() {
        let html = r#"
            <html><head><title>Example Domain</title>
            <style>body { color: red; }</style></head>
            <body>
              <script>alert('hi');</script>
              <p>Hello world</p>
            </body></html>
        "#;
        let extracted = extract_text("html", html);
        assert_eq!(extracted.title.as_deref(), Some("Example Domain"));
        assert!(extracted.text.contains("Hello world"));
        assert!(!extracted.text.contains("alert"));
        assert!(!extracted.text.contains("color: red"));
    }

    #[test]
    fn plain_text_extensions_pass_through_unchanged() {
        let extracted = extract_text("md", "# Heading\n\nBody text.");
        assert_eq!(extracted.text, "# Heading\n\nBody text.");
        assert!(extracted.title.is_none());
    }
}
