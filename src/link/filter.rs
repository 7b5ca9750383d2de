//! Heuristics for telling download links apart from navigation.

use super::Link;

/// Extensions treated as downloadable files.
pub const FILE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz", "zst", "iso", "img", "dmg", "exe", "msi",
    "apk", "deb", "rpm", "appimage", "pdf", "epub", "mobi", "djvu", "doc", "docx", "xls", "xlsx",
    "ppt", "pptx", "odt", "csv", "mp3", "flac", "wav", "ogg", "m4a", "mp4", "mkv", "avi", "mov",
    "webm", "torrent", "bin", "jar",
];

/// Button and anchor wording that signals a download control.
pub const DOWNLOAD_WORDS: &[&str] = &[
    "download",
    "descargar",
    "télécharger",
    "telecharger",
    "herunterladen",
    "scarica",
    "baixar",
    "get file",
    "direct link",
    "mirror",
];

/// Href fragments of social, sharing and account pages.
const BLOCKED_HREF_MARKERS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "://x.com",
    "instagram.com",
    "pinterest.",
    "reddit.com/submit",
    "linkedin.com",
    "tumblr.com",
    "t.me/",
    "telegram.me",
    "whatsapp",
    "vk.com/share",
    "sharer",
    "/share?",
    "/share/",
    "addtoany",
    "/login",
    "/signin",
    "/sign-in",
    "/signup",
    "/register",
    "/tag/",
    "/category/",
    "/author/",
    "/feed",
    "#comment",
];

/// Anchor texts of typical navigation links.
const NAVIGATION_TEXT: &[&str] = &[
    "home",
    "next",
    "previous",
    "prev",
    "back",
    "share",
    "tweet",
    "log in",
    "login",
    "sign in",
    "sign up",
    "register",
    "contact",
    "about",
    "privacy",
    "privacy policy",
    "terms",
    "faq",
    "comments",
];

/// Returns true when the path component of `href` ends in a known file extension.
///
/// Query strings and fragments are ignored, so `/get/a.zip?token=1` matches.
#[must_use]
pub fn href_has_file_extension(href: &str) -> bool {
    let path = href
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    let Some((stem, extension)) = last_segment.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && FILE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
}

/// Returns true for social/share/account links that never lead to a download.
#[must_use]
pub fn is_blocked_href(href: &str) -> bool {
    let lower = href.to_lowercase();
    lower.starts_with("mailto:")
        || lower.starts_with("javascript:")
        || lower.starts_with("tel:")
        || BLOCKED_HREF_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
}

/// Returns true when `text` contains download wording.
#[must_use]
pub fn mentions_download(text: &str) -> bool {
    let lower = text.to_lowercase();
    DOWNLOAD_WORDS.iter().any(|word| lower.contains(word))
}

fn is_navigation_text(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    NAVIGATION_TEXT.contains(&lower.as_str())
}

/// Keeps links that look like downloads and drops navigation/social links.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    extra_keywords: Vec<String>,
}

impl LinkFilter {
    /// Creates the default heuristic filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds site-specific words that mark a link as a download (matched
    /// case-insensitively against text and href).
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_keywords
            .extend(keywords.into_iter().map(|k| k.as_ref().to_lowercase()));
        self
    }

    /// Decides whether `link` should be kept.
    #[must_use]
    pub fn keep(&self, link: &Link) -> bool {
        let href = link.url();
        let text = link.text().unwrap_or_default();
        if is_blocked_href(href) || is_navigation_text(text) {
            return false;
        }

        let href_lower = href.to_lowercase();
        let text_lower = text.to_lowercase();
        href_has_file_extension(link.as_url().path())
            || mentions_download(text)
            || href_lower.contains("download")
            || self
                .extra_keywords
                .iter()
                .any(|k| text_lower.contains(k) || href_lower.contains(k))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn link(url: &str, text: &str) -> Link {
        Link::parse(url).unwrap().with_text(text)
    }

    #[test]
    fn test_href_has_file_extension() {
        assert!(href_has_file_extension("/files/movie.rar"));
        assert!(href_has_file_extension("https://x.test/a.ZIP?sig=abc#frag"));
        assert!(href_has_file_extension("archive.tar.gz"));
        assert!(!href_has_file_extension("/files/index.html"));
        assert!(!href_has_file_extension("/files/"));
        assert!(!href_has_file_extension("/.zip"));
    }

    #[test]
    fn test_blocked_hrefs() {
        assert!(is_blocked_href("mailto:a@b.c"));
        assert!(is_blocked_href("https://twitter.com/intent/tweet?url=x"));
        assert!(is_blocked_href("https://example.com/login?next=/"));
        assert!(!is_blocked_href("https://example.com/files/a.zip"));
    }

    #[test]
    fn test_filter_keeps_file_links_and_download_text() {
        let filter = LinkFilter::new();
        assert!(filter.keep(&link("https://example.com/a.zip", "")));
        assert!(filter.keep(&link("https://example.com/item/9", "Download (12 MB)")));
        assert!(filter.keep(&link("https://example.com/download/9", "here")));
    }

    #[test]
    fn test_filter_drops_navigation_and_social() {
        let filter = LinkFilter::new();
        assert!(!filter.keep(&link("https://example.com/page/2", "Next")));
        assert!(!filter.keep(&link("https://example.com/about", "About")));
        assert!(!filter.keep(&link(
            "https://www.facebook.com/sharer/sharer.php?u=a.zip",
            "Share"
        )));
        assert!(!filter.keep(&link("https://example.com/a.zip", "Home")));
    }

    #[test]
    fn test_filter_extra_keywords() {
        let plain = LinkFilter::new();
        let custom = LinkFilter::new().with_keywords(["Mediafire"]);
        let candidate = link("https://www.mediafire.com/file/abc", "mirror 2");
        assert!(plain.keep(&candidate), "mirror is a download word");

        let bare = link("https://www.mediafire.com/file/abc", "abc");
        assert!(!plain.keep(&bare));
        assert!(custom.keep(&bare));
    }
}
