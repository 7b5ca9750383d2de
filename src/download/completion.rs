//! Poll-driven completion detection for one triggered download.
//!
//! The browser exposes no completion event, so the detector infers progress
//! from the output directory alone: which files appeared since the trigger,
//! whether any still carry an incomplete marker, and whether sizes hold
//! still. It never reads file contents.
//!
//! ```text
//! TRIGGERED -> DOWNLOADING -> STABILIZING -> COMPLETE
//!      \______________\______________\_____-> TIMED_OUT
//! ```
//!
//! A stall (no observable change for the grace period) is an event, not a
//! state: the detector reports it, the caller runs a stall handler, and
//! waiting resumes until the recovery budget or the overall timeout runs out.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::constants::{
    DEFAULT_MAX_STALL_RECOVERIES, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, DEFAULT_STALL_GRACE,
};
use super::error::TaskError;
use super::filename::{base_name, is_incomplete};
use super::observer::{DirectoryObserver, Listing};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Detector state. Ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetectorState {
    /// Download action issued, nothing observed yet.
    Triggered,
    /// A candidate file appeared and is still being written.
    Downloading,
    /// No incomplete marker remains; waiting for a stable size.
    Stabilizing,
    /// Size held across two consecutive polls.
    Complete,
    /// The maximum wait elapsed first.
    TimedOut,
}

impl DetectorState {
    /// True for `Complete` and `TimedOut`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::TimedOut)
    }

    /// Lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Downloading => "downloading",
            Self::Stabilizing => "stabilizing",
            Self::Complete => "complete",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing parameters for completion detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Delay between directory polls.
    pub poll_interval: Duration,
    /// Idle time after which a stall is reported. Always shorter than `max_wait`.
    pub stall_grace: Duration,
    /// Overall time budget measured from the trigger.
    pub max_wait: Duration,
    /// Recovery attempts allowed before a stall becomes a failure.
    pub max_stall_recoveries: u32,
}

impl DetectorSettings {
    /// Creates settings, clamping `stall_grace` below `max_wait` and
    /// enforcing a minimum poll interval.
    #[must_use]
    pub fn new(
        poll_interval: Duration,
        stall_grace: Duration,
        max_wait: Duration,
        max_stall_recoveries: u32,
    ) -> Self {
        let stall_grace = if stall_grace.is_zero() || stall_grace >= max_wait {
            max_wait / 2
        } else {
            stall_grace
        };
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            stall_grace,
            max_wait,
            max_stall_recoveries,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_STALL_GRACE,
            DEFAULT_MAX_WAIT,
            DEFAULT_MAX_STALL_RECOVERIES,
        )
    }
}

/// What a single poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Nothing changed state.
    Waiting,
    /// The detector moved to a new state.
    Advanced(DetectorState),
    /// No observable change for the grace period.
    Stalled {
        /// Time since the last observed change.
        idle: Duration,
    },
    /// The download finished.
    Completed {
        /// Final filename in the output directory.
        filename: String,
        /// Final size in bytes.
        size: u64,
    },
    /// The maximum wait elapsed.
    TimedOut {
        /// Time since the trigger.
        elapsed: Duration,
    },
}

/// A finished download as seen by the detector.
#[derive(Debug, Clone)]
pub struct CompletedFile {
    /// Filename chosen as the download's primary file.
    pub filename: String,
    /// Size at completion.
    pub size: u64,
    /// Directory listing at completion, for duplicate resolution.
    pub listing: Listing,
}

/// Decision returned by a [`StallHandler`].
#[derive(Debug)]
pub enum StallVerdict {
    /// Keep waiting.
    Continue,
    /// Give up on the task with this error.
    Abort(TaskError),
}

/// Recovery action run when a download stalls (dismiss an overlay, check for
/// an expired session).
#[async_trait]
pub trait StallHandler: Send {
    /// Called once per reported stall.
    async fn on_stall(&mut self, state: DetectorState) -> StallVerdict;
}

/// A handler that never intervenes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreStalls;

#[async_trait]
impl StallHandler for IgnoreStalls {
    async fn on_stall(&mut self, _state: DetectorState) -> StallVerdict {
        StallVerdict::Continue
    }
}

/// Completion state machine for one download task.
#[derive(Debug)]
pub struct CompletionDetector {
    settings: DetectorSettings,
    baseline: Listing,
    expected: Option<String>,
    started: Instant,
    state: DetectorState,
    fingerprint: Vec<(String, u64)>,
    last_progress: Instant,
    stable: Option<(String, u64)>,
    stability_polls: u32,
    stalls: u32,
    last_size: u64,
}

impl CompletionDetector {
    /// Creates a detector in `Triggered`.
    ///
    /// `baseline` is the directory listing taken before the download action;
    /// only files absent from it are considered. `expected` is the
    /// link-derived filename, when known.
    #[must_use]
    pub fn new(
        settings: DetectorSettings,
        baseline: Listing,
        expected: Option<String>,
        started: Instant,
    ) -> Self {
        Self {
            settings,
            baseline,
            expected,
            started,
            state: DetectorState::Triggered,
            fingerprint: Vec::new(),
            last_progress: started,
            stable: None,
            stability_polls: 0,
            stalls: 0,
            last_size: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Stability polls passed on the current candidate.
    #[must_use]
    pub fn stability_polls(&self) -> u32 {
        self.stability_polls
    }

    /// Stalls reported so far.
    #[must_use]
    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    /// Last observed size of the leading candidate file.
    #[must_use]
    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Elapsed time since the trigger, as of `now`.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Feeds one directory listing observed at `now` into the state machine.
    ///
    /// Once a terminal state is reached, further observations return
    /// [`PollEvent::Waiting`].
    pub fn observe(&mut self, listing: &Listing, now: Instant) -> PollEvent {
        if self.state.is_terminal() {
            return PollEvent::Waiting;
        }
        let elapsed = self.elapsed(now);
        if elapsed >= self.settings.max_wait {
            self.state = DetectorState::TimedOut;
            return PollEvent::TimedOut { elapsed };
        }

        let fingerprint: Vec<(String, u64)> = listing
            .new_since(&self.baseline)
            .map(|(name, size)| (name.to_string(), size))
            .collect();
        if fingerprint != self.fingerprint {
            self.fingerprint.clone_from(&fingerprint);
            self.last_progress = now;
        }
        // Borrowed from the local copy so `self` stays free for the transitions below
        let fresh: Vec<(&str, u64)> = fingerprint
            .iter()
            .map(|(name, size)| (name.as_str(), *size))
            .collect();

        let candidates = self.candidates(&fresh);
        // Any fresh marker blocks completion, even one the name heuristic did not pick
        let incomplete = fresh.iter().any(|(name, _)| is_incomplete(name));
        let primary = self.primary(&candidates);
        if let Some(size) = primary
            .map(|(_, size)| size)
            .or_else(|| candidates.iter().map(|(_, size)| *size).max())
        {
            self.last_size = size;
        }

        let before = self.state;
        match self.state {
            DetectorState::Triggered if !candidates.is_empty() => {
                self.state = DetectorState::Downloading;
                self.enter_stabilizing(primary, incomplete);
            }
            DetectorState::Downloading => self.enter_stabilizing(primary, incomplete),
            DetectorState::Stabilizing => match primary {
                Some((name, size)) if !incomplete => {
                    let unchanged = self
                        .stable
                        .as_ref()
                        .is_some_and(|(stable_name, stable_size)| {
                            stable_name == name && *stable_size == size
                        });
                    if unchanged {
                        self.stability_polls += 1;
                        self.state = DetectorState::Complete;
                        return PollEvent::Completed {
                            filename: name.to_string(),
                            size,
                        };
                    }
                    self.stable = Some((name.to_string(), size));
                    self.stability_polls = 0;
                }
                _ => {
                    self.stable = None;
                    self.stability_polls = 0;
                }
            },
            _ => {}
        }

        if self.state != before {
            self.last_progress = now;
            return PollEvent::Advanced(self.state);
        }

        let idle = now.saturating_duration_since(self.last_progress);
        if idle >= self.settings.stall_grace {
            self.last_progress = now;
            self.stalls += 1;
            return PollEvent::Stalled { idle };
        }
        PollEvent::Waiting
    }

    /// Polls `observer` until the download completes, times out, stalls past
    /// the recovery budget, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TimedOut`], [`TaskError::Stalled`],
    /// [`TaskError::Cancelled`], [`TaskError::Observer`] if the directory
    /// cannot be listed, or whatever error `handler` aborts with.
    #[tracing::instrument(skip_all, fields(expected = self.expected.as_deref().unwrap_or("-")))]
    pub async fn wait(
        &mut self,
        observer: &dyn DirectoryObserver,
        cancel: &CancellationToken,
        handler: &mut dyn StallHandler,
    ) -> Result<CompletedFile, TaskError> {
        loop {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            let listing = observer
                .list()
                .map_err(|e| TaskError::observer(observer.root(), e))?;

            match self.observe(&listing, Instant::now()) {
                PollEvent::Completed { filename, size } => {
                    debug!(filename = %filename, size, "download complete");
                    return Ok(CompletedFile {
                        filename,
                        size,
                        listing,
                    });
                }
                PollEvent::TimedOut { elapsed } => {
                    debug!(elapsed_ms = elapsed.as_millis(), state = %self.state, "download timed out");
                    return Err(TaskError::TimedOut { elapsed });
                }
                PollEvent::Advanced(state) => debug!(state = %state, "detector advanced"),
                PollEvent::Stalled { idle } => {
                    if self.stalls > self.settings.max_stall_recoveries {
                        return Err(TaskError::Stalled {
                            attempts: self.settings.max_stall_recoveries,
                        });
                    }
                    info!(
                        idle_secs = idle.as_secs(),
                        state = %self.state,
                        stall = self.stalls,
                        "download stalled, attempting recovery"
                    );
                    if let StallVerdict::Abort(error) = handler.on_stall(self.state).await {
                        return Err(error);
                    }
                }
                PollEvent::Waiting => {}
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(TaskError::Cancelled),
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    fn enter_stabilizing(&mut self, primary: Option<(&str, u64)>, incomplete: bool) {
        if incomplete {
            return;
        }
        if let Some((name, size)) = primary {
            self.state = DetectorState::Stabilizing;
            self.stable = Some((name.to_string(), size));
            self.stability_polls = 0;
        }
    }

    /// Fresh entries that belong to this task: those matching the expected
    /// name (ignoring markers and duplicate suffixes) when any do, else all.
    fn candidates<'a>(&self, fresh: &[(&'a str, u64)]) -> Vec<(&'a str, u64)> {
        if let Some(expected) = &self.expected {
            let expected_base = base_name(expected);
            let matching: Vec<_> = fresh
                .iter()
                .copied()
                .filter(|(name, _)| base_name(name) == expected_base)
                .collect();
            if !matching.is_empty() {
                return matching;
            }
        }
        fresh.to_vec()
    }

    /// The complete candidate to track: exact expected name first, then a
    /// decorated variant of it, then the largest.
    fn primary<'a>(&self, candidates: &[(&'a str, u64)]) -> Option<(&'a str, u64)> {
        let expected = self.expected.as_deref();
        let expected_base = expected.map(base_name);
        candidates
            .iter()
            .copied()
            .filter(|(name, _)| !is_incomplete(name))
            .max_by_key(|(name, size)| {
                let rank = if Some(*name) == expected {
                    2
                } else if expected_base.as_deref() == Some(base_name(name).as_str()) {
                    1
                } else {
                    0
                };
                (rank, *size)
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn settings() -> DetectorSettings {
        DetectorSettings::new(
            Duration::from_millis(500),
            Duration::from_secs(3),
            Duration::from_secs(10),
            2,
        )
    }

    fn detector(expected: Option<&str>) -> (CompletionDetector, Instant) {
        let start = Instant::now();
        let baseline = Listing::new().with("old.pdf", 100);
        let detector =
            CompletionDetector::new(settings(), baseline, expected.map(String::from), start);
        (detector, start)
    }

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    // ==================== State machine ====================

    #[test]
    fn test_full_progression_to_complete() {
        let (mut d, t0) = detector(Some("a.zip"));
        let base = Listing::new().with("old.pdf", 100);

        assert_eq!(d.observe(&base, at(t0, 0)), PollEvent::Waiting);

        let writing = base.clone().with("a.zip.crdownload", 10);
        assert_eq!(
            d.observe(&writing, at(t0, 500)),
            PollEvent::Advanced(DetectorState::Downloading)
        );

        let renamed = base.clone().with("a.zip", 40);
        assert_eq!(
            d.observe(&renamed, at(t0, 1000)),
            PollEvent::Advanced(DetectorState::Stabilizing)
        );
        assert_eq!(
            d.observe(&renamed, at(t0, 1500)),
            PollEvent::Completed {
                filename: "a.zip".to_string(),
                size: 40
            }
        );
        assert_eq!(d.state(), DetectorState::Complete);
        assert_eq!(d.stability_polls(), 1);
    }

    #[test]
    fn test_growing_marker_is_progress_until_it_stops() {
        let (mut d, t0) = detector(Some("a.zip"));
        let growing = |size| Listing::new().with("old.pdf", 100).with("a.zip.crdownload", size);

        d.observe(&growing(1), at(t0, 0));
        assert_eq!(d.state(), DetectorState::Downloading);
        for tick in 1..=5 {
            let event = d.observe(&growing(tick * 10), at(t0, tick * 1000));
            assert_eq!(event, PollEvent::Waiting, "tick {tick}");
        }
        assert_eq!(d.last_size(), 50);

        // Same bytes for the whole grace period
        assert_eq!(d.observe(&growing(50), at(t0, 6500)), PollEvent::Waiting);
        assert_eq!(
            d.observe(&growing(50), at(t0, 8000)),
            PollEvent::Stalled {
                idle: Duration::from_secs(3)
            }
        );
        assert_eq!(d.state(), DetectorState::Downloading);
    }

    #[test]
    fn test_never_completes_while_marker_present() {
        let (mut d, t0) = detector(Some("a.zip"));
        let listing = Listing::new()
            .with("old.pdf", 100)
            .with("a.zip", 40)
            .with("a.zip.crdownload", 40);
        for tick in 0..19 {
            let event = d.observe(&listing, at(t0, tick * 500));
            assert!(
                !matches!(event, PollEvent::Completed { .. }),
                "completed at tick {tick}"
            );
        }
        assert!(d.state() < DetectorState::Complete);
    }

    #[test]
    fn test_size_change_restarts_stability() {
        let (mut d, t0) = detector(Some("a.zip"));
        let first = Listing::new().with("a.zip", 10);
        let grown = Listing::new().with("a.zip", 20);

        d.observe(&first, at(t0, 0));
        assert_eq!(d.state(), DetectorState::Stabilizing);
        assert_eq!(d.observe(&grown, at(t0, 500)), PollEvent::Waiting);
        assert!(matches!(
            d.observe(&grown, at(t0, 1000)),
            PollEvent::Completed { size: 20, .. }
        ));
    }

    #[test]
    fn test_marker_reappearing_resets_without_regression() {
        let (mut d, t0) = detector(Some("a.zip"));
        let done = Listing::new().with("a.zip", 10);
        let again = done.clone().with("a.zip.part", 1);

        d.observe(&done, at(t0, 0));
        assert_eq!(d.state(), DetectorState::Stabilizing);
        assert_eq!(d.observe(&again, at(t0, 500)), PollEvent::Waiting);
        assert_eq!(d.state(), DetectorState::Stabilizing);
        // Needs two clean polls again
        assert_eq!(d.observe(&done, at(t0, 1000)), PollEvent::Waiting);
        assert!(matches!(
            d.observe(&done, at(t0, 1500)),
            PollEvent::Completed { .. }
        ));
    }

    #[test]
    fn test_timeout_from_triggered() {
        let (mut d, t0) = detector(None);
        let empty = Listing::new().with("old.pdf", 100);
        assert_eq!(
            d.observe(&empty, at(t0, 10_000)),
            PollEvent::TimedOut {
                elapsed: Duration::from_secs(10)
            }
        );
        assert_eq!(d.state(), DetectorState::TimedOut);
        assert_eq!(d.observe(&empty, at(t0, 10_500)), PollEvent::Waiting);
    }

    #[test]
    fn test_stall_reported_after_grace_and_counted() {
        let (mut d, t0) = detector(Some("big.iso"));
        let stuck = Listing::new().with("big.iso.crdownload", 500);

        assert_eq!(
            d.observe(&stuck, at(t0, 0)),
            PollEvent::Advanced(DetectorState::Downloading)
        );
        assert_eq!(d.observe(&stuck, at(t0, 2500)), PollEvent::Waiting);
        assert_eq!(
            d.observe(&stuck, at(t0, 3000)),
            PollEvent::Stalled {
                idle: Duration::from_secs(3)
            }
        );
        assert_eq!(d.stalls(), 1);
        assert_eq!(d.state(), DetectorState::Downloading);

        // Growth counts as progress
        let grown = Listing::new().with("big.iso.crdownload", 900);
        assert_eq!(d.observe(&grown, at(t0, 5500)), PollEvent::Waiting);
        assert_eq!(d.observe(&grown, at(t0, 8000)), PollEvent::Waiting);
        assert!(matches!(
            d.observe(&grown, at(t0, 8500)),
            PollEvent::Stalled { .. }
        ));
        assert_eq!(d.stalls(), 2);
        assert_eq!(d.last_size(), 900);
    }

    #[test]
    fn test_unrelated_new_file_is_not_the_candidate() {
        let (mut d, t0) = detector(Some("a.zip"));
        let listing = Listing::new()
            .with("unrelated.txt", 5)
            .with("a.zip.crdownload", 3);
        d.observe(&listing, at(t0, 0));
        assert_eq!(d.state(), DetectorState::Downloading);

        let listing = Listing::new().with("unrelated.txt", 5).with("a.zip", 9);
        d.observe(&listing, at(t0, 500));
        assert!(matches!(
            d.observe(&listing, at(t0, 1000)),
            PollEvent::Completed { ref filename, .. } if filename == "a.zip"
        ));
    }

    #[test]
    fn test_unknown_expected_name_tracks_any_new_file() {
        let (mut d, t0) = detector(Some("a.zip"));
        let writing = Listing::new().with("Unconfirmed 4411.crdownload", 3);
        d.observe(&writing, at(t0, 0));
        assert_eq!(d.state(), DetectorState::Downloading);

        let done = Listing::new().with("server-name.zip", 9);
        d.observe(&done, at(t0, 500));
        assert!(matches!(
            d.observe(&done, at(t0, 1000)),
            PollEvent::Completed { ref filename, .. } if filename == "server-name.zip"
        ));
    }

    #[test]
    fn test_settings_clamp_grace_below_max_wait() {
        let s = DetectorSettings::new(
            Duration::ZERO,
            Duration::from_secs(8),
            Duration::from_secs(5),
            2,
        );
        assert_eq!(s.stall_grace, Duration::from_millis(2500));
        assert_eq!(s.poll_interval, MIN_POLL_INTERVAL);
    }

    // ==================== Async wait ====================

    /// Replays listings keyed by offset from creation.
    struct Timeline {
        root: PathBuf,
        start: Instant,
        steps: Vec<(Duration, Listing)>,
    }

    impl Timeline {
        fn new(steps: Vec<(u64, Listing)>) -> Self {
            Self {
                root: PathBuf::from("/virtual"),
                start: Instant::now(),
                steps: steps
                    .into_iter()
                    .map(|(ms, listing)| (Duration::from_millis(ms), listing))
                    .collect(),
            }
        }
    }

    impl DirectoryObserver for Timeline {
        fn root(&self) -> &Path {
            &self.root
        }

        fn list(&self) -> std::io::Result<Listing> {
            let elapsed = self.start.elapsed();
            Ok(self
                .steps
                .iter()
                .rev()
                .find(|(offset, _)| *offset <= elapsed)
                .map(|(_, listing)| listing.clone())
                .unwrap_or_default())
        }
    }

    struct CountingHandler {
        calls: u32,
        abort: bool,
    }

    #[async_trait]
    impl StallHandler for CountingHandler {
        async fn on_stall(&mut self, _state: DetectorState) -> StallVerdict {
            self.calls += 1;
            if self.abort {
                StallVerdict::Abort(TaskError::SessionExpired)
            } else {
                StallVerdict::Continue
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes() {
        let observer = Timeline::new(vec![
            (0, Listing::new()),
            (1000, Listing::new().with("a.zip.crdownload", 5)),
            (2000, Listing::new().with("a.zip", 12)),
        ]);
        let mut d = CompletionDetector::new(
            settings(),
            Listing::new(),
            Some("a.zip".to_string()),
            Instant::now(),
        );
        let done = d
            .wait(&observer, &CancellationToken::new(), &mut IgnoreStalls)
            .await
            .unwrap();
        assert_eq!(done.filename, "a.zip");
        assert_eq!(done.size, 12);
        assert!(done.listing.contains("a.zip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_marker_stuck() {
        let observer = Timeline::new(vec![(0, Listing::new().with("c.bin.crdownload", 7))]);
        let settings = DetectorSettings::new(
            Duration::from_millis(500),
            Duration::from_secs(8),
            Duration::from_secs(5),
            2,
        );
        let mut d = CompletionDetector::new(settings, Listing::new(), None, Instant::now());
        let mut handler = CountingHandler {
            calls: 0,
            abort: false,
        };
        let err = d
            .wait(&observer, &CancellationToken::new(), &mut handler)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "timeout");
        assert_eq!(handler.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fails_when_stall_recoveries_exhausted() {
        let observer = Timeline::new(vec![(0, Listing::new().with("c.bin.part", 7))]);
        let settings = DetectorSettings::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        );
        let mut d = CompletionDetector::new(settings, Listing::new(), None, Instant::now());
        let mut handler = CountingHandler {
            calls: 0,
            abort: false,
        };
        let err = d
            .wait(&observer, &CancellationToken::new(), &mut handler)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Stalled { attempts: 2 }));
        assert_eq!(handler.calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_recovery_abort_ends_task() {
        let observer = Timeline::new(vec![(0, Listing::new())]);
        let mut d = CompletionDetector::new(settings(), Listing::new(), None, Instant::now());
        let mut handler = CountingHandler {
            calls: 0,
            abort: true,
        };
        let err = d
            .wait(&observer, &CancellationToken::new(), &mut handler)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "session expired");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled_mid_poll() {
        let observer = Timeline::new(vec![(0, Listing::new())]);
        let mut d = CompletionDetector::new(settings(), Listing::new(), None, Instant::now());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });
        let err = d.wait(&observer, &cancel, &mut IgnoreStalls).await.unwrap_err();
        assert!(matches!(err, TaskError::Cancelled));
    }
}
