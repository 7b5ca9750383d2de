//! Filename derivation and comparison for browser-saved downloads.
//!
//! Browsers decorate filenames in two ways the engine must see through:
//! an incomplete-marker suffix while writing (`a.zip.crdownload`) and a
//! numeric duplicate suffix on collisions (`a (1).zip`). [`base_name`]
//! strips both so names can be compared against the link-derived name.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::constants::INCOMPLETE_MARKERS;

/// Extensions of web pages, which never name a downloaded file.
const PAGE_EXTENSIONS: [&str; 9] = [
    "html", "htm", "xhtml", "php", "asp", "aspx", "jsp", "cgi", "shtml",
];

/// Matches browser duplicate suffixes: `name (1).ext`, `name(12)`, `name (3).tar.gz`.
#[allow(clippy::expect_used)]
static DUPLICATE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.*?) ?\(\d{1,4}\)(?P<ext>\.[^()]*)?$").expect("duplicate regex is valid")
});

/// Returns true when `name` ends with an incomplete-download marker.
#[must_use]
pub fn is_incomplete(name: &str) -> bool {
    let lower = name.to_lowercase();
    INCOMPLETE_MARKERS
        .iter()
        .any(|marker| lower.ends_with(marker))
}

/// Removes one incomplete-download marker suffix, if present.
#[must_use]
pub fn strip_incomplete_marker(name: &str) -> &str {
    let lower = name.to_lowercase();
    INCOMPLETE_MARKERS
        .iter()
        .find(|marker| lower.ends_with(*marker))
        .map_or(name, |marker| &name[..name.len() - marker.len()])
}

/// Removes a browser duplicate suffix: `movie (1).rar` becomes `movie.rar`.
#[must_use]
pub fn strip_duplicate_suffix(name: &str) -> String {
    match DUPLICATE_SUFFIX.captures(name) {
        Some(caps) if !caps["stem"].trim().is_empty() => format!(
            "{}{}",
            &caps["stem"],
            caps.name("ext").map_or("", |m| m.as_str())
        ),
        _ => name.to_string(),
    }
}

/// Strips the incomplete marker, then the duplicate suffix.
#[must_use]
pub fn base_name(name: &str) -> String {
    strip_duplicate_suffix(strip_incomplete_marker(name))
}

/// Derives the filename a browser will most likely save for `url`.
///
/// Uses the percent-decoded last path segment when it carries an extension
/// that is not a web-page extension. Returns `None` otherwise: the real name
/// is then only known once the file appears.
#[must_use]
pub fn expected_filename(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    let name = sanitize_filename(&decoded);
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty()
        || extension.is_empty()
        || extension.len() > 12
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        || PAGE_EXTENSIONS
            .iter()
            .any(|page| page.eq_ignore_ascii_case(extension))
    {
        return None;
    }
    Some(name)
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_incomplete_markers() {
        assert!(is_incomplete("a.zip.crdownload"));
        assert!(is_incomplete("Unconfirmed 812.crdownload"));
        assert!(is_incomplete("a.zip.PART"));
        assert!(is_incomplete("a.zip.tmp"));
        assert!(!is_incomplete("a.zip"));
        assert!(!is_incomplete("partial.zip"));
    }

    #[test]
    fn test_strip_incomplete_marker() {
        assert_eq!(strip_incomplete_marker("a.zip.crdownload"), "a.zip");
        assert_eq!(strip_incomplete_marker("a.zip.Part"), "a.zip");
        assert_eq!(strip_incomplete_marker("a.zip"), "a.zip");
    }

    #[test]
    fn test_strip_duplicate_suffix() {
        assert_eq!(strip_duplicate_suffix("movie (1).rar"), "movie.rar");
        assert_eq!(strip_duplicate_suffix("movie(12).rar"), "movie.rar");
        assert_eq!(strip_duplicate_suffix("backup (2).tar.gz"), "backup.tar.gz");
        assert_eq!(strip_duplicate_suffix("notes (3)"), "notes");
        assert_eq!(strip_duplicate_suffix("movie.rar"), "movie.rar");
        assert_eq!(strip_duplicate_suffix("(1).rar"), "(1).rar");
        assert_eq!(
            strip_duplicate_suffix("Season (2019) final.mkv"),
            "Season (2019) final.mkv"
        );
    }

    #[test]
    fn test_base_name_strips_both_decorations() {
        assert_eq!(base_name("movie (1).rar.crdownload"), "movie.rar");
        assert_eq!(base_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn test_expected_filename_from_url() {
        let url = Url::parse("https://example.com/files/report.pdf?dl=1").unwrap();
        assert_eq!(expected_filename(&url), Some("report.pdf".to_string()));

        let url = Url::parse("https://example.com/files/My%20Movie.rar").unwrap();
        assert_eq!(expected_filename(&url), Some("My Movie.rar".to_string()));
    }

    #[test]
    fn test_expected_filename_none_for_pages() {
        for raw in [
            "https://example.com/",
            "https://example.com/item/42",
            "https://example.com/view.php?id=1",
            "https://example.com/index.html",
        ] {
            let url = Url::parse(raw).unwrap();
            assert_eq!(expected_filename(&url), None, "{raw}");
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("file (1).pdf"), "file (1).pdf");
    }
}
