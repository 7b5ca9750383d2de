//! Per-link download task and its lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use super::completion::DetectorState;
use super::error::TaskError;
use crate::link::Link;

/// Lifecycle of one download task. Ordered; a task never revisits a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    /// Waiting to be processed.
    Queued,
    /// A live browser session is available.
    SessionReady,
    /// The download action was issued.
    Triggered,
    /// A file is being written.
    Downloading,
    /// Writing finished; size is settling.
    Stabilizing,
    /// Checking the finished file.
    Verifying,
    /// File downloaded and verified.
    Done,
    /// Task gave up; see the recorded error.
    Failed,
    /// Nothing to do: the file already exists.
    Skipped,
}

impl TaskState {
    /// True for `Done`, `Failed` and `Skipped`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// Uppercase name used in summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::SessionReady => "SESSION_READY",
            Self::Triggered => "TRIGGERED",
            Self::Downloading => "DOWNLOADING",
            Self::Stabilizing => "STABILIZING",
            Self::Verifying => "VERIFYING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DetectorState> for TaskState {
    fn from(state: DetectorState) -> Self {
        match state {
            DetectorState::Triggered => Self::Triggered,
            DetectorState::Downloading => Self::Downloading,
            DetectorState::Stabilizing | DetectorState::Complete => Self::Stabilizing,
            DetectorState::TimedOut => Self::Failed,
        }
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the task was in.
    pub from: TaskState,
    /// Requested state.
    pub to: TaskState,
}

/// One attempt to obtain a file from a [`Link`].
#[derive(Debug)]
pub struct DownloadTask {
    link: Link,
    output_dir: PathBuf,
    state: TaskState,
    started: Instant,
    last_size: u64,
    stability_polls: u32,
    filename: Option<String>,
    error: Option<TaskError>,
}

impl DownloadTask {
    /// Creates a queued task.
    #[must_use]
    pub fn new(link: Link, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            link,
            output_dir: output_dir.into(),
            state: TaskState::Queued,
            started: Instant::now(),
            last_size: 0,
            stability_polls: 0,
            filename: None,
            error: None,
        }
    }

    /// Moves forward to `next`.
    ///
    /// Skipping intermediate states is allowed; moving backwards, staying put,
    /// or leaving a terminal state is not. `Done`, `Failed` and `Skipped` are
    /// alternatives, so any non-terminal state may move to any of them.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for a backward or post-terminal move.
    pub fn advance(&mut self, next: TaskState) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() || (!next.is_terminal() && next <= self.state) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Ends the task in `Failed` with `error`. Ignored on terminal tasks.
    pub fn fail(&mut self, error: TaskError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TaskState::Failed;
        self.error = Some(error);
    }

    /// Records the last observed size and stability polls.
    pub fn observe_progress(&mut self, last_size: u64, stability_polls: u32) {
        self.last_size = last_size;
        self.stability_polls = stability_polls;
    }

    /// Assigns the file this task produced or matched.
    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    /// Source link.
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Output directory.
    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Time since the task was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Last observed file size in bytes.
    #[must_use]
    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Stability polls passed before completion.
    #[must_use]
    pub fn stability_polls(&self) -> u32 {
        self.stability_polls
    }

    /// Assigned filename, once known.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Full path of the assigned file, once known.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        self.filename.as_ref().map(|name| self.output_dir.join(name))
    }

    /// Failure cause, if the task failed.
    #[must_use]
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Takes the failure cause out of the task.
    pub fn take_error(&mut self) -> Option<TaskError> {
        self.error.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn task() -> DownloadTask {
        DownloadTask::new(Link::parse("https://example.com/a.zip").unwrap(), "/out")
    }

    #[test]
    fn test_forward_transitions_allowed() {
        let mut t = task();
        t.advance(TaskState::SessionReady).unwrap();
        t.advance(TaskState::Triggered).unwrap();
        // Direct downloads can jump straight to stabilizing
        t.advance(TaskState::Stabilizing).unwrap();
        t.advance(TaskState::Verifying).unwrap();
        t.advance(TaskState::Done).unwrap();
        assert_eq!(t.state(), TaskState::Done);
    }

    #[test]
    fn test_backward_and_repeated_transitions_rejected() {
        let mut t = task();
        t.advance(TaskState::Triggered).unwrap();
        let err = t.advance(TaskState::SessionReady).unwrap_err();
        assert_eq!(err.from, TaskState::Triggered);
        assert!(t.advance(TaskState::Triggered).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = task();
        t.advance(TaskState::Skipped).unwrap();
        assert!(t.advance(TaskState::Done).is_err());
        t.fail(TaskError::Cancelled);
        assert_eq!(t.state(), TaskState::Skipped);
        assert!(t.error().is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let mut t = task();
        t.advance(TaskState::SessionReady).unwrap();
        t.fail(TaskError::no_actionable_element("https://example.com/a.zip"));
        assert_eq!(t.state(), TaskState::Failed);
        assert_eq!(t.error().unwrap().reason(), "no actionable element");
    }

    #[test]
    fn test_file_path_joins_output_dir() {
        let mut t = task();
        assert!(t.file_path().is_none());
        t.set_filename("a.zip");
        assert_eq!(t.file_path().unwrap(), PathBuf::from("/out/a.zip"));
    }

    #[test]
    fn test_detector_state_mapping() {
        assert_eq!(
            TaskState::from(DetectorState::Downloading),
            TaskState::Downloading
        );
        assert_eq!(
            TaskState::from(DetectorState::Complete),
            TaskState::Stabilizing
        );
    }
}
