//! Error types for the download module.
//!
//! [`TaskError`] is the terminal failure of one download task. Every variant
//! maps to a short, stable [`TaskError::reason`] string used in the run
//! summary. [`VerificationError`] covers integrity checks on finished files.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::automation::AutomationError;

/// Errors raised while verifying a finished download.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The file still carries an incomplete-download marker.
    #[error("{path} is still incomplete")]
    Incomplete {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The file does not exist.
    #[error("{path} does not exist")]
    Missing {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The file could not be read.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The computed checksum differs from a recorded one.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Mismatch {
        /// Path being checked.
        path: PathBuf,
        /// Recorded checksum.
        expected: String,
        /// Computed checksum.
        actual: String,
    },
}

impl VerificationError {
    /// Creates an incomplete-file error.
    pub fn incomplete(path: impl Into<PathBuf>) -> Self {
        Self::Incomplete { path: path.into() }
    }

    /// Creates a missing-file error.
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::Missing { path: path.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a download task ended in FAILED.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No selector strategy matched an element on the page.
    #[error("no actionable download element found on {url}")]
    NoActionableElement {
        /// Page that was searched.
        url: String,
    },

    /// The download stopped making progress and recovery attempts were exhausted.
    #[error("download stalled after {attempts} recovery attempts")]
    Stalled {
        /// Recovery attempts spent.
        attempts: u32,
    },

    /// The download did not finish within the maximum wait.
    #[error("download did not complete within {}s", .elapsed.as_secs())]
    TimedOut {
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// The finished file failed verification.
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// Completion was reported but no new file could be attributed to the task.
    #[error("download completed but no new file appeared")]
    NoFileProduced,

    /// The site expired the browsing session and a retry did not help.
    #[error("browser session expired")]
    SessionExpired,

    /// A browser command failed.
    #[error(transparent)]
    Automation(#[from] AutomationError),

    /// The output directory could not be read.
    #[error("cannot observe {path}: {source}")]
    Observer {
        /// Directory being observed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No browser session could be created for the task.
    #[error("browser session unavailable: {0}")]
    SessionUnavailable(String),

    /// The run was cancelled before the task finished.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Creates a no-actionable-element error.
    pub fn no_actionable_element(url: impl Into<String>) -> Self {
        Self::NoActionableElement { url: url.into() }
    }

    /// Creates an observer IO error.
    pub fn observer(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Observer {
            path: path.into(),
            source,
        }
    }

    /// Short, stable failure reason for summaries.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoActionableElement { .. } => "no actionable element",
            Self::Stalled { .. } => "stalled",
            Self::TimedOut { .. } => "timeout",
            Self::Verification(_) => "verification failed",
            Self::NoFileProduced => "no file produced",
            Self::SessionExpired => "session expired",
            Self::Automation(_) => "automation error",
            Self::Observer { .. } => "filesystem error",
            Self::SessionUnavailable(_) => "session unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}
