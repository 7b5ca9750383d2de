//! Download links: identity, normalization, discovery and filtering.
//!
//! A [`Link`] is an http(s) URL plus optional anchor text. Two links are the
//! same link when their normalized forms match (scheme, host, port, path and
//! query; fragment dropped; trailing slash ignored).
//!
//! Links come from two places:
//! - [`extract_links`] - anchors of a page DOM read through the automation capability
//! - [`parse_url_list`] - free text (a URL list file, command-line arguments)
//!
//! # Example
//!
//! ```
//! use pagegrab_core::link::Link;
//!
//! let a = Link::parse("https://Example.com/files/").unwrap();
//! let b = Link::parse("https://example.com/files#top").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.key(), "https://example.com/files");
//! ```

mod error;
mod extract;
mod filter;
mod input;

pub use error::{LinkError, MAX_URL_LENGTH};
pub use extract::extract_links;
pub use filter::{
    LinkFilter, href_has_file_extension, is_blocked_href, mentions_download,
};
pub use input::{UrlListParse, parse_url_list};

use std::fmt;
use std::hash::{Hash, Hasher};

use url::Url;

use crate::download::expected_filename;

/// A candidate download link. Immutable once created.
#[derive(Debug, Clone)]
pub struct Link {
    url: Url,
    text: Option<String>,
    key: String,
}

impl Link {
    /// Parses and validates an absolute http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the URL is too long, malformed, has no host,
    /// or uses a scheme other than http/https.
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let raw = raw.trim();
        if raw.len() > MAX_URL_LENGTH {
            return Err(LinkError::too_long(raw));
        }
        let url = Url::parse(raw).map_err(|e| LinkError::malformed(raw, &e.to_string()))?;
        Self::from_url(url)
    }

    /// Builds a link from an already parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] for non-http(s) schemes or URLs without a host.
    pub fn from_url(mut url: Url) -> Result<Self, LinkError> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(LinkError::unsupported_scheme(url.as_str(), scheme)),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(LinkError::no_host(url.as_str()));
        }
        url.set_fragment(None);
        let key = normalize_url(&url);
        Ok(Self {
            url,
            text: None,
            key,
        })
    }

    /// Attaches display text (whitespace-collapsed; empty text is dropped).
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        self.text = (!collapsed.is_empty()).then_some(collapsed);
        self
    }

    /// The URL as given (fragment removed).
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// The parsed URL.
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Anchor text, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Normalized identity key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Filename the browser is expected to save, when the URL path names one.
    #[must_use]
    pub fn expected_filename(&self) -> Option<String> {
        expected_filename(&self.url)
    }

    /// True when the URL itself points at a downloadable file, so loading it
    /// starts the download without clicking anything.
    #[must_use]
    pub fn is_direct_file(&self) -> bool {
        href_has_file_extension(self.url.path())
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Normalizes a URL to its identity key: `scheme://host[:port]/path[?query]`
/// with trailing slashes removed from the path and the fragment dropped.
#[must_use]
pub fn normalize_url(url: &Url) -> String {
    let mut key = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// Removes repeated links (by normalized key), keeping first occurrences in order.
#[must_use]
pub fn dedup_links(links: impl IntoIterator<Item = Link>) -> Vec<Link> {
    let mut seen = std::collections::HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.key().to_string()))
        .collect()
}
