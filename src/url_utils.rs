//! URL import helpers: newline-separated lists and free-form pasted text.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use url::Url;

use crate::error::Result;

/// Parse a newline-separated URL list.
///
/// Each line is trimmed; lines that don't start with `http://` or `https://`
/// (blank lines, comments, notes) are skipped. Order and duplicates are kept,
/// so every listed line becomes one queue entry.
pub fn import_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// Read a URL list file and apply [`import_url_list`].
pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(import_url_list(&text))
}

/// Pull every http(s) URL out of pasted text.
///
/// Trailing prose punctuation is trimmed, URLs are normalized with
/// [`normalize_http_url`], and duplicates are dropped keeping first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Stops at whitespace; `Url` does the real validation.
    let Ok(re) = Regex::new(r"https?://\S+") else {
        return out;
    };

    for m in re.find_iter(text) {
        let cleaned = trim_trailing_punct(m.as_str());
        if let Some(normalized) = normalize_http_url(cleaned) {
            if seen.insert(normalized.clone()) {
                out.push(normalized);
            }
        }
    }

    out
}

/// Normalize an http(s) URL: lowercase scheme and host, default port
/// removed (both done by `Url`), fragment stripped. Anything else is `None`.
pub fn normalize_http_url(input: &str) -> Option<String> {
    let mut url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// `https://example.com/foo),` -> `https://example.com/foo`
fn trim_trailing_punct(s: &str) -> &str {
    s.trim_end_matches(|ch: char| {
        matches!(
            ch,
            ')' | ']' | '}' | '>' | ',' | '.' | ';' | ':' | '!' | '?' | '"' | '\''
        )
    })
}
