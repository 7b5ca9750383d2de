//! Browser-driven download pipeline.
//!
//! The browser writes files into the output directory on its own; this
//! module decides when such a file is finished and which file belongs to
//! which link.
//!
//! # Components
//!
//! - [`CompletionDetector`] - polls a [`DirectoryObserver`] until a new file
//!   stops growing and carries no incomplete marker
//! - [`resolve`] - picks the file a task produced out of the new entries
//! - [`IntegrityVerifier`] - checks the finished file and computes its checksum
//! - [`DownloadTask`] - per-link lifecycle state machine
//! - [`Orchestrator`] - runs every link through the steps above
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use pagegrab_core::download::{CompletionDetector, DetectorSettings, Listing, PollEvent};
//! use tokio::time::Instant;
//!
//! let settings = DetectorSettings::new(
//!     Duration::from_millis(500),
//!     Duration::from_secs(8),
//!     Duration::from_secs(20),
//!     2,
//! );
//! let start = Instant::now();
//! let mut detector = CompletionDetector::new(settings, Listing::new(), None, start);
//! let event = detector.observe(&Listing::new().with("a.zip.crdownload", 10), start);
//! assert!(matches!(event, PollEvent::Advanced(_)));
//! ```

mod completion;
mod constants;
mod duplicate;
mod engine;
mod error;
mod filename;
mod integrity;
mod observer;
mod task;

pub use completion::{
    CompletedFile, CompletionDetector, DetectorSettings, DetectorState, IgnoreStalls, PollEvent,
    StallHandler, StallVerdict,
};
pub use constants::{
    DEFAULT_INTER_DOWNLOAD_DELAY, DEFAULT_MAX_STALL_RECOVERIES, DEFAULT_MAX_WAIT,
    DEFAULT_POLL_INTERVAL, DEFAULT_SESSION_REFRESH_COUNT, DEFAULT_STALL_GRACE, INCOMPLETE_MARKERS,
};
pub use duplicate::{DuplicateAmbiguity, Resolution, resolve};
pub use engine::{Orchestrator, RunError};
pub use error::{TaskError, VerificationError};
pub use filename::{
    base_name, expected_filename, is_incomplete, sanitize_filename, strip_duplicate_suffix,
    strip_incomplete_marker,
};
pub use integrity::{Checksum, IntegrityVerifier};
pub use observer::{DirectoryObserver, Listing, LocalDirectory, clean_incomplete_files};
pub use task::{DownloadTask, InvalidTransition, TaskState};
