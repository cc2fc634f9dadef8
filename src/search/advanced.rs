//! Matching and scoring rules for the optional advanced (code/JSON block)
//! extractor, §4.7. Synthesized directly from the distilled spec's
//! description of the `keys`/`values`/`structure` JSON modes and the code
//! block relevance score — no teacher file covers this, see DESIGN.md.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blocks::{BlockKind, ContentBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonSearchMode {
    Keys,
    Values,
    Structure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonMatchInfo {
    pub mode: JsonSearchMode,
    pub matched_keywords: Vec<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Recursively collect every object key (when `mode` includes keys) and
/// every scalar value's string form (when `mode` includes values) that
/// case-insensitively contains `keyword`.
fn structural_hits(value: &Value, keyword: &str, mode: JsonSearchMode, hit: &mut bool) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if matches!(mode, JsonSearchMode::Keys | JsonSearchMode::Structure) && contains_ci(k, keyword) {
                    *hit = true;
                }
                structural_hits(v, keyword, mode, hit);
            }
        }
        Value::Array(items) => {
            for v in items {
                structural_hits(v, keyword, mode, hit);
            }
        }
        Value::String(s) => {
            if matches!(mode, JsonSearchMode::Values | JsonSearchMode::Structure) && contains_ci(s, keyword) {
                *hit = true;
            }
        }
        Value::Number(n) => {
            if matches!(mode, JsonSearchMode::Values | JsonSearchMode::Structure) && contains_ci(&n.to_string(), keyword) {
                *hit = true;
            }
        }
        Value::Bool(b) => {
            if matches!(mode, JsonSearchMode::Values | JsonSearchMode::Structure) && contains_ci(&b.to_string(), keyword) {
                *hit = true;
            }
        }
        Value::Null => {}
    }
}

/// A JSON block matches when a structural search (per `mode`) over
/// `scan_keywords` finds at least one hit, or any scan/extract keyword
/// appears verbatim anywhere in the raw block text.
pub fn json_block_match(
    block: &ContentBlock,
    scan_keywords: &[String],
    extract_keywords: &[String],
    mode: JsonSearchMode,
) -> Option<JsonMatchInfo> {
    debug_assert_eq!(block.kind, BlockKind::Json);

    let parsed = serde_json::from_str::<Value>(&block.content).ok();

    let mut matched_keywords = Vec::new();
    if let Some(value) = &parsed {
        for keyword in scan_keywords {
            let mut hit = false;
            structural_hits(value, keyword, mode, &mut hit);
            if hit {
                matched_keywords.push(keyword.clone());
            }
        }
    }

    let all_keywords = scan_keywords.iter().chain(extract_keywords.iter());
    let raw_match = all_keywords.clone().any(|k| contains_ci(&block.content, k));

    if !matched_keywords.is_empty() || raw_match {
        if matched_keywords.is_empty() {
            matched_keywords = all_keywords.filter(|k| contains_ci(&block.content, k)).cloned().collect();
        }
        Some(JsonMatchInfo { mode, matched_keywords })
    } else {
        None
    }
}

/// A code block matches only when every scan and extract keyword is present
/// (case-insensitive substring). The score weights total keyword hit count
/// plus a flat bonus for carrying a recognized language tag.
pub fn code_block_score(block: &ContentBlock, scan_keywords: &[String], extract_keywords: &[String]) -> Option<f64> {
    debug_assert_eq!(block.kind, BlockKind::Code);

    let all: Vec<&String> = scan_keywords.iter().chain(extract_keywords.iter()).collect();
    if all.is_empty() || !all.iter().all(|k| contains_ci(&block.content, k)) {
        return None;
    }

    let lower = block.content.to_lowercase();
    let hits: usize = all
        .iter()
        .map(|k| lower.matches(&k.to_lowercase()).count())
        .sum();

    let language_bonus = if block.language.is_some() { 0.5 } else { 0.0 };
    Some(hits as f64 + language_bonus)
}

/// A text block matches when every scan and extract keyword is present.
pub fn text_block_match(block: &ContentBlock, scan_keywords: &[String], extract_keywords: &[String]) -> bool {
    debug_assert_eq!(block.kind, BlockKind::Text);
    let all: Vec<&String> = scan_keywords.iter().chain(extract_keywords.iter()).collect();
    !all.is_empty() && all.iter().all(|k| contains_ci(&block.content, k))
}
