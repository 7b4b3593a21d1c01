//! Pull code and prose out of free-form model responses.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think regex should compile"));
static MARKER_REGION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<PYTEST_FILE>(.*?)</PYTEST_FILE>").expect("marker regex should compile")
});
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n`]*\n(.*?)```").expect("fence regex should compile")
});

/// Remove `<think>...</think>` reasoning markup.
///
/// A dangling `</think>` (opening tag cut off upstream) drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(text, "");
    let lower = stripped.to_ascii_lowercase();
    match lower.rfind("</think>") {
        Some(idx) => stripped[idx + "</think>".len()..].trim().to_string(),
        None => stripped.trim().to_string(),
    }
}

/// Extract the test module from a synthesis response.
///
/// Order: the `<PYTEST_FILE>` region, the longest fenced block, the whole
/// response. Never fails; an empty response yields an empty string.
pub fn extract_code(response: &str) -> String {
    let text = strip_reasoning(response);

    if let Some(region) = MARKER_REGION.captures(&text).and_then(|caps| caps.get(1)) {
        return strip_fence_lines(region.as_str());
    }

    FENCED_BLOCK
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .max_by_key(|block| block.len())
        .map(|block| block.trim().to_string())
        .unwrap_or(text)
}

fn strip_fence_lines(region: &str) -> String {
    region
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First `max_chars` characters of `text`, with a marker when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
