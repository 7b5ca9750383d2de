//! Browser-automation capability consumed by the orchestration engine.
//!
//! The engine never talks to a browser directly. It drives an [`Automation`]
//! handle (navigate, find candidate elements, click, read the DOM, dismiss
//! overlays, close) produced by a [`SessionFactory`]. The concrete
//! [`ChromeFactory`] launches Chrome and drives it over the DevTools
//! protocol; tests substitute scripted fakes.
//!
//! # Architecture
//!
//! - [`Automation`] - Async trait for one live browser context
//! - [`SessionFactory`] - Creates fresh [`Automation`] handles
//! - [`SelectorStrategy`] - Ordered, pure element matchers used to find the
//!   control that starts a download

mod chrome;
mod selector;

pub use chrome::{BrowserOptions, ChromeFactory, ChromeSession};
pub use selector::{SelectorStrategy, default_strategies};

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque driver-side identifier of a DOM element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// A candidate DOM element as reported by the automation capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Driver handle used to act on the element.
    pub handle: ElementHandle,
    /// Lowercase tag name (`a`, `button`, `input`, ...).
    pub tag: String,
    /// Visible text content, whitespace-collapsed.
    pub text: String,
    /// Attributes fetched for matching (`href`, `id`, `class`, ...).
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    /// Creates an element with no text and no attributes.
    #[must_use]
    pub fn new(handle: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            handle: ElementHandle(handle.into()),
            tag: tag.into().to_ascii_lowercase(),
            text: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the element's visible text.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Returns an attribute value, if present.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A page snapshot: the current URL and its serialized DOM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// URL the browser reports for the current page.
    pub url: String,
    /// Serialized HTML source.
    pub html: String,
}

impl Document {
    /// Creates a document snapshot.
    #[must_use]
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Errors reported by the automation capability.
///
/// The engine treats these as opaque except for [`Self::indicates_dead_session`],
/// which decides whether the session must be replaced.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    /// The browser or driver could not be reached or started.
    #[error("browser unavailable: {message}")]
    Unavailable {
        /// Driver-provided detail.
        message: String,
    },

    /// Navigation to a URL failed.
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Driver-provided detail.
        message: String,
    },

    /// The element handle no longer refers to a live DOM node.
    #[error("stale element reference: {message}")]
    StaleElement {
        /// Driver-provided detail.
        message: String,
    },

    /// The element exists but cannot be clicked (covered, hidden, disabled).
    #[error("element not interactable: {message}")]
    NotInteractable {
        /// Driver-provided detail.
        message: String,
    },

    /// The driver no longer recognizes the session.
    #[error("invalid browser session: {message}")]
    InvalidSession {
        /// Driver-provided detail.
        message: String,
    },

    /// Any other command failure.
    #[error("automation command failed: {message}")]
    Command {
        /// Driver-provided detail.
        message: String,
    },
}

impl AutomationError {
    /// Creates an unavailable-browser error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a navigation error.
    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a stale-element error.
    pub fn stale(message: impl Into<String>) -> Self {
        Self::StaleElement {
            message: message.into(),
        }
    }

    /// Creates a not-interactable error.
    pub fn not_interactable(message: impl Into<String>) -> Self {
        Self::NotInteractable {
            message: message.into(),
        }
    }

    /// Creates an invalid-session error.
    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::InvalidSession {
            message: message.into(),
        }
    }

    /// Creates a generic command error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Returns true when the error means the session should be replaced.
    #[must_use]
    pub fn indicates_dead_session(&self) -> bool {
        matches!(
            self,
            Self::StaleElement { .. } | Self::InvalidSession { .. } | Self::Unavailable { .. }
        )
    }
}

/// One live browser-automation context.
///
/// Implementations must release all resources (driver session, temporary
/// profile) in [`Automation::close`]. Callers close explicitly; dropping a
/// handle without closing may leak the remote session.
#[async_trait]
pub trait Automation: Send {
    /// Loads `url` in the current tab.
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError>;

    /// Returns the elements matching any of `selectors` (CSS), in document
    /// order, without duplicates.
    async fn find_candidates(
        &mut self,
        selectors: &[&str],
    ) -> Result<Vec<Element>, AutomationError>;

    /// Clicks a previously returned element.
    async fn click(&mut self, element: &Element) -> Result<(), AutomationError>;

    /// Returns the current page URL and serialized DOM.
    async fn read_dom(&mut self) -> Result<Document, AutomationError>;

    /// Removes modal overlays covering the page. Returns true if anything was
    /// dismissed.
    async fn dismiss_overlay(&mut self) -> Result<bool, AutomationError>;

    /// Ends the session and releases its resources.
    async fn close(&mut self) -> Result<(), AutomationError>;
}

/// Creates fresh automation sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Starts a new browser context.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError`] if the browser cannot be initialized.
    async fn create(&self) -> Result<Box<dyn Automation>, AutomationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_builder_lowercases_tag() {
        let element = Element::new("e1", "BUTTON")
            .with_text("Download")
            .with_attr("id", "dl-btn");
        assert_eq!(element.tag, "button");
        assert_eq!(element.text, "Download");
        assert_eq!(element.attr("id"), Some("dl-btn"));
        assert_eq!(element.attr("href"), None);
    }

    #[test]
    fn test_dead_session_classification() {
        assert!(AutomationError::stale("gone").indicates_dead_session());
        assert!(AutomationError::invalid_session("expired").indicates_dead_session());
        assert!(AutomationError::unavailable("no chrome").indicates_dead_session());
        assert!(!AutomationError::not_interactable("covered").indicates_dead_session());
        assert!(!AutomationError::command("boom").indicates_dead_session());
    }

    #[test]
    fn test_navigation_error_display_includes_url() {
        let msg = AutomationError::navigation("https://example.com/x", "net::ERR").to_string();
        assert!(msg.contains("https://example.com/x"));
        assert!(msg.contains("net::ERR"));
    }
}
