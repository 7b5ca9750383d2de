//! Fallback element-selection strategies for triggering a download.
//!
//! Each strategy pairs a set of CSS selectors (what to ask the browser for)
//! with a pure matcher (which of the returned elements qualifies). The engine
//! tries strategies in order and clicks the first match.

use super::Element;
use crate::link::{Link, href_has_file_extension, is_blocked_href, mentions_download};

/// An ordered fallback step for locating the control that starts a download.
#[derive(Debug, Clone, Copy)]
pub struct SelectorStrategy {
    /// Short name used in logs.
    pub name: &'static str,
    /// CSS selectors passed to [`super::Automation::find_candidates`].
    pub selectors: &'static [&'static str],
    /// Pure predicate over a candidate element and the link being processed.
    pub matches: fn(&Element, &Link) -> bool,
}

impl SelectorStrategy {
    /// Returns the first candidate accepted by this strategy's matcher.
    #[must_use]
    pub fn select<'a>(&self, candidates: &'a [Element], link: &Link) -> Option<&'a Element> {
        candidates
            .iter()
            .find(|element| (self.matches)(element, link))
    }
}

/// Default strategy order: explicit `download` anchors, anchors pointing at
/// file-like paths, controls labelled as downloads, then anything whose id or
/// class mentions downloading.
#[must_use]
pub fn default_strategies() -> Vec<SelectorStrategy> {
    vec![
        SelectorStrategy {
            name: "download-attribute",
            selectors: &["a[download]"],
            matches: not_blocked,
        },
        SelectorStrategy {
            name: "file-link",
            selectors: &["a[href]"],
            matches: points_at_file,
        },
        SelectorStrategy {
            name: "download-label",
            selectors: &[
                "a",
                "button",
                "input[type='submit']",
                "input[type='button']",
            ],
            matches: labelled_download,
        },
        SelectorStrategy {
            name: "download-hint",
            selectors: &[
                "[id*='download']",
                "[class*='download']",
                "[data-action*='download']",
            ],
            matches: not_blocked,
        },
    ]
}

fn not_blocked(element: &Element, _link: &Link) -> bool {
    element.attr("href").is_none_or(|href| !is_blocked_href(href))
}

fn points_at_file(element: &Element, link: &Link) -> bool {
    element
        .attr("href")
        .is_some_and(|href| href_has_file_extension(href) && !is_blocked_href(href))
        && not_blocked(element, link)
}

fn labelled_download(element: &Element, link: &Link) -> bool {
    let labelled = mentions_download(&element.text)
        || element.attr("value").is_some_and(mentions_download)
        || element.attr("title").is_some_and(mentions_download)
        || element.attr("aria-label").is_some_and(mentions_download);
    labelled && not_blocked(element, link)
}
