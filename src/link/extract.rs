//! Anchor extraction from a page DOM.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::{debug, trace, warn};
use url::Url;

use super::{Link, LinkFilter, normalize_url};
use crate::automation::Document;

/// Extracts unique links from the anchors of `document`, in document order.
///
/// Relative hrefs are resolved against the document URL. Fragment-only
/// anchors, non-web schemes and links back to the page itself are skipped.
/// When `filter` is given, only links it keeps are returned.
///
/// This is a pure function of the DOM snapshot; it performs no network I/O.
#[tracing::instrument(skip(document, filter), fields(page = %document.url, filtered = filter.is_some()))]
#[must_use]
pub fn extract_links(document: &Document, filter: Option<&LinkFilter>) -> Vec<Link> {
    let Ok(base) = Url::parse(&document.url) else {
        warn!(page = %document.url, "page URL is not absolute; no links extracted");
        return Vec::new();
    };
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let page_key = normalize_url(&base);

    let html = Html::parse_document(&document.html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut dropped = 0usize;

    for element in html.select(&anchor) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            trace!(href, "unresolvable href");
            continue;
        };
        let text = element.text().collect::<Vec<_>>().join(" ");
        let link = match Link::from_url(resolved) {
            Ok(link) => link.with_text(&text),
            Err(e) => {
                trace!(href, error = %e, "skipping non-web link");
                continue;
            }
        };
        if link.key() == page_key {
            continue;
        }
        if let Some(filter) = filter
            && !filter.keep(&link)
        {
            dropped += 1;
            trace!(url = %link, "filtered out");
            continue;
        }
        if seen.insert(link.key().to_string()) {
            links.push(link);
        }
    }

    debug!(count = links.len(), dropped, "links extracted");
    links
}
