//! Text preparation for keywords and caption embeddings.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

const TRUNCATION_SUFFIX: &str = "...";

const KEYWORD_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "this", "that", "these", "those", "there", "here",
    "when", "where", "why", "how", "what", "who", "which", "can", "may", "might", "must",
    "shall", "about", "into", "through", "during", "before", "after", "above", "below",
    "up", "down", "out", "off", "over", "under", "again", "further", "then", "once",
];

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s.,!?:;\-]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Lowercase, drop everything but word characters and basic punctuation,
/// collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let text = DISALLOWED_CHARS.replace_all(text.trim(), "");
    WHITESPACE.replace_all(&text.to_lowercase(), " ").into_owned()
}

/// Distinct keywords in order of first appearance.
pub fn extract_keywords(text: &str, min_len: usize, max: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    // commas separate keywords in the catalog, so they never appear inside one
    for word in clean_text(text).split(|c: char| c.is_whitespace() || c == ',') {
        if keywords.len() >= max {
            break;
        }

        let word = word.trim_matches(|c: char| ".!?\":;".contains(c));
        if word.is_empty()
            || word.chars().count() < min_len
            || KEYWORD_STOP_WORDS.contains(&word)
            || word.chars().all(|c| c.is_ascii_digit())
            || keywords.iter().any(|k| k == word)
        {
            continue;
        }

        keywords.push(word.to_string());
    }

    keywords
}

/// Embedding input built from both captions.
///
/// Returns `None` when both captions are blank.
pub fn caption_input(short: &str, detailed: &str) -> Option<String> {
    let short = short.trim();
    let detailed = detailed.trim();

    let content = match (short.is_empty(), detailed.is_empty()) {
        (true, true) => return None,
        (false, true) => short.to_string(),
        (true, false) => detailed.to_string(),
        (false, false) => format!("{short}. {detailed}"),
    };

    Some(truncate_content(&content))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{truncated}{TRUNCATION_SUFFIX}")
}

/// Stable hash of an embedding input, stored next to the vector so stale
/// embeddings can be detected after captions change.
pub fn content_hash(content: &str) -> u64 {
    let digest = Sha256::digest(content.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
