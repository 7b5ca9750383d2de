//! URL extraction from free text (URL list files, command-line arguments).

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

use super::{Link, LinkError, dedup_links};

/// Regex pattern for finding URLs in text.
/// Matches http:// and https:// URLs, capturing until whitespace or common delimiters.
#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'\]]+"#).expect("URL regex is valid") // Static pattern, safe to panic
});

/// Result of parsing a block of text for links.
#[derive(Debug, Default)]
pub struct UrlListParse {
    /// Valid, deduplicated links in first-seen order.
    pub links: Vec<Link>,
    /// URL candidates that failed validation.
    pub rejected: Vec<LinkError>,
}

/// Extracts links from free text, one or many per line.
///
/// Lines starting with `#` are comments. Trailing sentence punctuation and
/// unbalanced closing brackets are trimmed from each match.
///
/// # Examples
///
/// ```
/// use pagegrab_core::link::parse_url_list;
///
/// let parsed = parse_url_list("# mirrors\nhttps://example.com/a.zip.\nsee https://example.com/b.rar");
/// assert_eq!(parsed.links.len(), 2);
/// assert_eq!(parsed.links[0].url(), "https://example.com/a.zip");
/// ```
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
#[must_use]
pub fn parse_url_list(input: &str) -> UrlListParse {
    let mut links = Vec::new();
    let mut rejected = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        for url_match in URL_PATTERN.find_iter(line) {
            let cleaned = clean_url_trailing(url_match.as_str());
            trace!(url = %cleaned, "found URL candidate");
            match Link::parse(cleaned) {
                Ok(link) => links.push(link),
                Err(e) => {
                    debug!(url = %cleaned, error = %e, "URL validation failed");
                    rejected.push(e);
                }
            }
        }
    }

    UrlListParse {
        links: dedup_links(links),
        rejected,
    }
}

/// Cleans trailing punctuation that often gets captured with URLs.
fn clean_url_trailing(url: &str) -> &str {
    let mut result = url;

    while let Some(last) = result.chars().last() {
        match last {
            '.' | ',' | ';' | ':' | '!' | '?' => {
                result = &result[..result.len() - 1];
            }
            ')' | ']' => {
                // Keep the closer when the URL itself opened it (wiki-style paths)
                let open = if last == ')' { '(' } else { '[' };
                let open_count = result.chars().filter(|&c| c == open).count();
                let close_count = result.chars().filter(|&c| c == last).count();
                if close_count > open_count {
                    result = &result[..result.len() - 1];
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    result
}
