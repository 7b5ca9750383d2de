//! Error types for link parsing and validation.

use thiserror::Error;

/// Maximum URL length to accept (standard browser limit).
pub const MAX_URL_LENGTH: usize = 2000;

/// Errors produced while turning raw text into a [`super::Link`].
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// URL is malformed, has no host, or uses an unsupported scheme.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL that failed validation
        url: String,
        /// Why the URL is invalid
        reason: String,
    },

    /// URL exceeds maximum allowed length
    #[error("URL too long ({length} chars, max {max}): {url_preview}...")]
    UrlTooLong {
        /// Truncated URL for display
        url_preview: String,
        /// Actual length
        length: usize,
        /// Maximum allowed
        max: usize,
    },
}

impl LinkError {
    /// Creates an `InvalidUrl` error for a non-web URL scheme.
    #[must_use]
    pub fn unsupported_scheme(url: &str, scheme: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: format!("scheme '{scheme}' is not supported"),
        }
    }

    /// Creates an `InvalidUrl` error for a malformed URL.
    #[must_use]
    pub fn malformed(url: &str, parse_error: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: parse_error.to_string(),
        }
    }

    /// Creates an `InvalidUrl` error for a URL without a host.
    #[must_use]
    pub fn no_host(url: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        }
    }

    /// Creates a `UrlTooLong` error for URLs exceeding the maximum length.
    #[must_use]
    pub fn too_long(url: &str) -> Self {
        Self::UrlTooLong {
            url_preview: url.chars().take(50).collect(),
            length: url.len(),
            max: MAX_URL_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_unsupported_scheme_message() {
        let msg = LinkError::unsupported_scheme("ftp://example.com", "ftp").to_string();
        assert!(msg.contains("ftp://example.com"));
        assert!(msg.contains("'ftp'"));
    }

    #[test]
    fn test_link_error_too_long_truncates_preview() {
        let long = format!("https://example.com/{}", "a".repeat(3000));
        let err = LinkError::too_long(&long);
        let LinkError::UrlTooLong {
            url_preview,
            length,
            max,
        } = err
        else {
            panic!("expected UrlTooLong");
        };
        assert_eq!(url_preview.chars().count(), 50);
        assert_eq!(length, long.len());
        assert_eq!(max, MAX_URL_LENGTH);
    }
}
