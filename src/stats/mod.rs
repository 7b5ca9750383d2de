//! Run statistics: per-link outcomes and aggregate counters.
//!
//! The engine owns the one mutable [`StatsTracker`]. Presentation layers
//! only ever see [`StatsSnapshot`] copies, published after each recorded
//! outcome.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::download::{Checksum, TaskState};
use crate::link::Link;

/// A verified or skipped file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Full path of the file.
    pub path: PathBuf,
    /// Content checksum; `None` when not computed.
    pub checksum: Option<Checksum>,
    /// Link the file came from.
    pub link: Link,
    /// Size in bytes.
    pub size: u64,
}

/// A failed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Link that failed.
    pub link: Link,
    /// Short failure reason (`"timeout"`, `"no actionable element"`, ...).
    pub reason: &'static str,
    /// Full error message.
    pub message: String,
    /// Time spent on the task.
    pub elapsed: Duration,
}

/// Terminal result of one download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Downloaded and verified.
    Done(FileRecord),
    /// Already present; nothing downloaded.
    Skipped(FileRecord),
    /// Gave up.
    Failed(FailureRecord),
}

impl TaskOutcome {
    /// The link this outcome belongs to.
    #[must_use]
    pub fn link(&self) -> &Link {
        match self {
            Self::Done(record) | Self::Skipped(record) => &record.link,
            Self::Failed(failure) => &failure.link,
        }
    }

    /// The terminal task state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self {
            Self::Done(_) => TaskState::Done,
            Self::Skipped(_) => TaskState::Skipped,
            Self::Failed(_) => TaskState::Failed,
        }
    }
}

/// Immutable view of run progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Tasks that ended DONE.
    pub succeeded: usize,
    /// Tasks that ended FAILED.
    pub failed: usize,
    /// Tasks that ended SKIPPED.
    pub skipped: usize,
    /// Outcomes in processing order.
    pub results: Vec<TaskOutcome>,
}

impl StatsSnapshot {
    /// Number of links recorded.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Files downloaded or skipped, in processing order.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.results.iter().filter_map(|outcome| match outcome {
            TaskOutcome::Done(record) | TaskOutcome::Skipped(record) => Some(record),
            TaskOutcome::Failed(_) => None,
        })
    }

    /// Failures, in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.results.iter().filter_map(|outcome| match outcome {
            TaskOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }

    /// The outcome recorded for `link`, if any.
    #[must_use]
    pub fn outcome_for(&self, link: &Link) -> Option<&TaskOutcome> {
        self.results.iter().find(|outcome| outcome.link() == link)
    }
}

/// Accumulates task outcomes. Counters only grow.
#[derive(Debug, Default)]
pub struct StatsTracker {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    results: Vec<TaskOutcome>,
    seen: HashSet<String>,
}

impl StatsTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal outcome.
    ///
    /// Each link is recorded at most once; a second outcome for the same
    /// link is logged and dropped, and `false` is returned.
    pub fn record(&mut self, outcome: TaskOutcome) -> bool {
        if !self.seen.insert(outcome.link().key().to_string()) {
            warn!(url = %outcome.link(), "outcome already recorded for link");
            return false;
        }
        match outcome {
            TaskOutcome::Done(_) => self.succeeded += 1,
            TaskOutcome::Skipped(_) => self.skipped += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
        self.results.push(outcome);
        true
    }

    /// True when `link` already has an outcome.
    #[must_use]
    pub fn contains(&self, link: &Link) -> bool {
        self.seen.contains(link.key())
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            results: self.results.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn link(url: &str) -> Link {
        Link::parse(url).unwrap()
    }

    fn done(url: &str) -> TaskOutcome {
        TaskOutcome::Done(FileRecord {
            path: PathBuf::from("/out/a.zip"),
            checksum: Some(Checksum::from_hex("ab")),
            link: link(url),
            size: 3,
        })
    }

    fn failed(url: &str) -> TaskOutcome {
        TaskOutcome::Failed(FailureRecord {
            link: link(url),
            reason: "timeout",
            message: "download did not complete within 5s".to_string(),
            elapsed: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_record_counts_by_state() {
        let mut stats = StatsTracker::new();
        assert!(stats.record(done("https://example.com/a")));
        assert!(stats.record(failed("https://example.com/b")));
        assert!(stats.record(TaskOutcome::Skipped(FileRecord {
            path: PathBuf::from("/out/c.pdf"),
            checksum: None,
            link: link("https://example.com/c"),
            size: 1,
        })));

        let snapshot = stats.snapshot();
        assert_eq!(
            (snapshot.succeeded, snapshot.failed, snapshot.skipped),
            (1, 1, 1)
        );
        assert_eq!(snapshot.processed(), 3);
        assert_eq!(snapshot.files().count(), 2);
        assert_eq!(snapshot.failures().next().unwrap().reason, "timeout");
    }

    #[test]
    fn test_link_recorded_at_most_once() {
        let mut stats = StatsTracker::new();
        assert!(stats.record(done("https://example.com/a")));
        assert!(!stats.record(failed("https://example.com/a/")));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed(), 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[test]
    fn test_snapshot_is_detached_from_tracker() {
        let mut stats = StatsTracker::new();
        stats.record(done("https://example.com/a"));
        let before = stats.snapshot();
        stats.record(failed("https://example.com/b"));
        assert_eq!(before.processed(), 1);
        assert_eq!(stats.snapshot().processed(), 2);
    }

    #[test]
    fn test_outcome_lookup_preserves_order() {
        let mut stats = StatsTracker::new();
        stats.record(failed("https://example.com/b"));
        stats.record(done("https://example.com/a"));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.results[0].state(), TaskState::Failed);
        assert_eq!(
            snapshot
                .outcome_for(&link("https://example.com/a"))
                .unwrap()
                .state(),
            TaskState::Done
        );
    }
}
