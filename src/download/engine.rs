//! Orchestration engine: drives each link from QUEUED to a terminal state.
//!
//! One link is processed at a time against a single browser session:
//!
//! ```text
//! skip-check -> ensure session -> trigger -> wait for completion
//!            -> resolve duplicates -> verify -> record -> delay
//! ```
//!
//! Per-task failures never abort the run; they end the task in FAILED with
//! a reason. Only a browser session that cannot be created within its retry
//! budget stops the run, and even then every link is accounted for.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagegrab_core::automation::{BrowserOptions, ChromeFactory};
//! use pagegrab_core::config::Config;
//! use pagegrab_core::download::Orchestrator;
//! use pagegrab_core::link::parse_url_list;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     output_directory: Some("./downloads".into()),
//!     ..Config::default()
//! };
//! let options = BrowserOptions::new(config.output_directory()?);
//! let factory = Arc::new(ChromeFactory::new(options));
//! let mut orchestrator = Orchestrator::new(config, factory)?;
//! let links = parse_url_list("https://example.com/files/report.pdf").links;
//! let snapshot = orchestrator.run(links).await?;
//! println!("done: {}, failed: {}", snapshot.succeeded, snapshot.failed);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::completion::{CompletionDetector, DetectorState, StallVerdict, StallHandler};
use super::duplicate::{Resolution, resolve};
use super::error::{TaskError, VerificationError};
use super::integrity::{Checksum, IntegrityVerifier};
use super::observer::{DirectoryObserver, Listing, LocalDirectory, clean_incomplete_files};
use super::task::{DownloadTask, TaskState};
use crate::automation::{
    Automation, AutomationError, SelectorStrategy, SessionFactory, default_strategies,
};
use crate::config::{Config, ConfigError};
use crate::link::{Link, LinkFilter, dedup_links, extract_links};
use crate::manifest::Manifest;
use crate::session::{SessionCreationError, SessionManager, is_expired_page};
use crate::stats::{FailureRecord, FileRecord, StatsSnapshot, StatsTracker, TaskOutcome};

/// Run-level failures.
#[derive(Debug, Error)]
pub enum RunError {
    /// The output directory could not be created.
    #[error("cannot prepare output directory {path}: {source}")]
    OutputDirectory {
        /// Output directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No browser session could be started. Every link is recorded as FAILED
    /// in `snapshot`.
    #[error("run aborted: {source}")]
    SessionCreation {
        /// Last creation failure.
        #[source]
        source: SessionCreationError,
        /// Statistics at the time of the abort.
        snapshot: Box<StatsSnapshot>,
    },

    /// A page could not be read for link discovery.
    #[error("cannot read links from {url}: {source}")]
    Discovery {
        /// Page URL.
        url: String,
        /// The automation failure.
        #[source]
        source: AutomationError,
    },
}

impl RunError {
    /// Final statistics, when the run got far enough to produce them.
    #[must_use]
    pub fn snapshot(&self) -> Option<&StatsSnapshot> {
        match self {
            Self::SessionCreation { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

/// Internal split between per-task failures and the run-fatal one.
#[derive(Debug)]
enum Failure {
    Task(TaskError),
    Session(SessionCreationError),
}

impl From<TaskError> for Failure {
    fn from(error: TaskError) -> Self {
        Self::Task(error)
    }
}

impl From<AutomationError> for Failure {
    fn from(error: AutomationError) -> Self {
        Self::Task(error.into())
    }
}

impl From<VerificationError> for Failure {
    fn from(error: VerificationError) -> Self {
        Self::Task(error.into())
    }
}

impl From<SessionCreationError> for Failure {
    fn from(error: SessionCreationError) -> Self {
        Self::Session(error)
    }
}

/// Top-level driver of a bulk download run.
pub struct Orchestrator {
    config: Config,
    output_dir: PathBuf,
    sessions: SessionManager,
    observer: Arc<dyn DirectoryObserver>,
    strategies: Vec<SelectorStrategy>,
    stats: StatsTracker,
    manifest: Manifest,
    cancel: CancellationToken,
    snapshots: watch::Sender<StatsSnapshot>,
    outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("output_dir", &self.output_dir)
            .field("sessions", &self.sessions)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator writing into the configured output directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or has no
    /// output directory.
    #[instrument(level = "debug", skip_all)]
    pub fn new(config: Config, factory: Arc<dyn SessionFactory>) -> Result<Self, ConfigError> {
        config.validate()?;
        let output_dir = config.output_directory()?.to_path_buf();
        let sessions = SessionManager::new(
            factory,
            config.session_refresh_count,
            config.session_retry_policy(),
        );
        let (snapshots, _) = watch::channel(StatsSnapshot::default());

        debug!(
            output_dir = %output_dir.display(),
            max_wait_secs = config.max_wait_seconds,
            refresh_every = config.session_refresh_count,
            delay_secs = config.inter_download_delay_seconds,
            "creating orchestrator"
        );

        Ok(Self {
            observer: Arc::new(LocalDirectory::new(&output_dir)),
            manifest: Manifest::empty(&output_dir),
            config,
            output_dir,
            sessions,
            strategies: default_strategies(),
            stats: StatsTracker::new(),
            cancel: CancellationToken::new(),
            snapshots,
            outcomes: None,
        })
    }

    /// Replaces the filesystem observer (it must observe the output directory).
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DirectoryObserver>) -> Self {
        if observer.root() != self.output_dir {
            warn!(
                observer = %observer.root().display(),
                output_dir = %self.output_dir.display(),
                "observer root differs from output directory"
            );
        }
        self.observer = observer;
        self
    }

    /// Uses `token` as the stop signal.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.sessions.set_cancellation(token.clone());
        self.cancel = token;
        self
    }

    /// Sends every terminal task outcome to `sender`, in processing order.
    #[must_use]
    pub fn with_outcome_sender(mut self, sender: mpsc::UnboundedSender<TaskOutcome>) -> Self {
        self.outcomes = Some(sender);
        self
    }

    /// Replaces the element-selection fallback order.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<SelectorStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Receives a fresh [`StatsSnapshot`] after every recorded outcome.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.snapshots.subscribe()
    }

    /// A handle to the stop signal.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current statistics.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Loads `page` in the browser and extracts its links, filtered when
    /// `filter_links` is set.
    ///
    /// On failure the browser session is closed before the error returns.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::SessionCreation`] if no session can be started and
    /// [`RunError::Discovery`] if the page cannot be loaded or read.
    #[instrument(skip_all, fields(page = %page))]
    pub async fn discover_links(&mut self, page: &Link) -> Result<Vec<Link>, RunError> {
        let session = match self.sessions.ensure_alive().await {
            Ok(session) => session,
            Err(source) => {
                return Err(RunError::SessionCreation {
                    source,
                    snapshot: Box::new(self.stats.snapshot()),
                });
            }
        };
        let driver = session.driver();
        let read = match driver.navigate(page.url()).await {
            Ok(()) => driver.read_dom().await,
            Err(e) => Err(e),
        };
        let document = match read {
            Ok(document) => document,
            Err(source) => {
                warn!(error = %source, "cannot read page, closing browser session");
                self.shutdown().await;
                return Err(RunError::Discovery {
                    url: page.url().to_string(),
                    source,
                });
            }
        };

        let filter = self.config.filter_links.then(LinkFilter::new);
        let links = extract_links(&document, filter.as_ref());
        info!(count = links.len(), filtered = filter.is_some(), "links discovered");
        Ok(links)
    }

    /// Closes the browser session, if one is open. [`Self::run`] does this
    /// itself when it finishes.
    pub async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
    }

    /// Processes `links` in order until every one has a terminal outcome.
    ///
    /// Links are deduplicated first. The returned snapshot covers this run
    /// and any earlier runs of the same orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::OutputDirectory`] if the output directory cannot
    /// be created, and [`RunError::SessionCreation`] when a browser session
    /// cannot be started; in that case the remaining links are recorded as
    /// FAILED and the final snapshot travels with the error.
    #[instrument(skip_all, fields(links = links.len(), output_dir = %self.output_dir.display()))]
    pub async fn run(&mut self, links: Vec<Link>) -> Result<StatsSnapshot, RunError> {
        self.prepare_output_dir()?;

        let links = dedup_links(links);
        let total = links.len();
        info!(total, "starting run");

        let delay = self.config.inter_download_delay();
        let mut queue = links.into_iter().peekable();
        while let Some(link) = queue.next() {
            if self.cancel.is_cancelled() {
                info!(remaining = queue.len() + 1, "run cancelled");
                for link in std::iter::once(link).chain(queue.by_ref()) {
                    let mut task = DownloadTask::new(link, &self.output_dir);
                    let outcome = self.failed(&mut task, TaskError::Cancelled);
                    self.record(outcome);
                }
                break;
            }

            let mut task = DownloadTask::new(link, &self.output_dir);
            if let Some(existing) = self.existing_file(task.link()) {
                info!(url = %task.link(), path = %existing.path.display(), "already downloaded, skipping");
                step(&mut task, TaskState::Skipped);
                self.record(TaskOutcome::Skipped(existing));
                continue;
            }

            let outcome = match self.process(&mut task).await {
                Ok(outcome) => outcome,
                Err(Failure::Task(error)) => self.failed(&mut task, error),
                Err(Failure::Session(source)) if self.cancel.is_cancelled() => {
                    debug!(error = %source, "session creation interrupted");
                    self.failed(&mut task, TaskError::Cancelled)
                }
                Err(Failure::Session(source)) => {
                    return Err(self.abort(task, queue.collect(), source).await);
                }
            };
            self.record(outcome);

            if queue.peek().is_some() && !delay.is_zero() {
                trace!(delay_ms = delay.as_millis(), "pausing between downloads");
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.shutdown().await;
        self.save_manifest();

        let snapshot = self.stats.snapshot();
        info!(
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            "run complete"
        );
        Ok(snapshot)
    }

    fn prepare_output_dir(&mut self) -> Result<(), RunError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| RunError::OutputDirectory {
            path: self.output_dir.clone(),
            source,
        })?;

        if self.config.clean_incomplete {
            match clean_incomplete_files(&self.output_dir) {
                Ok(removed) if !removed.is_empty() => {
                    info!(count = removed.len(), "removed leftover incomplete downloads");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cannot clean incomplete downloads"),
            }
        }

        if self.config.write_manifest {
            self.manifest = Manifest::load(&self.output_dir).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable manifest");
                Manifest::empty(&self.output_dir)
            });
        }
        Ok(())
    }

    /// A finished file already on disk for `link`: the manifest's record
    /// first, then the URL-derived filename.
    fn existing_file(&self, link: &Link) -> Option<FileRecord> {
        let listing = self.observer.list().ok()?;
        if let Some(entry) = self.manifest.get(link.key())
            && listing.has_complete(&entry.filename)
        {
            return Some(FileRecord {
                path: self.output_dir.join(&entry.filename),
                checksum: entry.checksum.clone(),
                link: link.clone(),
                size: listing.size(&entry.filename).unwrap_or(entry.size),
            });
        }
        let expected = link.expected_filename()?;
        listing.has_complete(&expected).then(|| FileRecord {
            path: self.output_dir.join(&expected),
            checksum: None,
            link: link.clone(),
            size: listing.size(&expected).unwrap_or_default(),
        })
    }

    #[instrument(skip_all, fields(url = %task.link()))]
    async fn process(&mut self, task: &mut DownloadTask) -> Result<TaskOutcome, Failure> {
        let link = task.link().clone();
        let expected = link.expected_filename();

        // One retry on a fresh session when the trigger hits a dead one
        let mut retried = false;
        let baseline = loop {
            let baseline = self.list()?;
            let session = self.sessions.ensure_alive().await?;
            step(task, TaskState::SessionReady);
            match trigger(session.driver(), &link, &self.strategies).await {
                Ok(()) => break baseline,
                Err(error) if !retried && needs_fresh_session(&error) => {
                    warn!(error = %error, "browser session looks dead, retrying on a fresh one");
                    self.sessions.mark_dead();
                    retried = true;
                }
                Err(error) => {
                    if needs_fresh_session(&error) {
                        self.sessions.mark_dead();
                    }
                    return Err(error.into());
                }
            }
        };
        step(task, TaskState::Triggered);

        let mut detector = CompletionDetector::new(
            self.config.detector_settings(),
            baseline.clone(),
            expected.clone(),
            Instant::now(),
        );
        let waited = match self.sessions.current_mut() {
            Some(session) => {
                let mut recovery = StallRecovery {
                    driver: session.driver(),
                };
                detector
                    .wait(self.observer.as_ref(), &self.cancel, &mut recovery)
                    .await
            }
            None => Err(TaskError::SessionUnavailable(
                "session closed during download".to_string(),
            )),
        };
        task.observe_progress(detector.last_size(), detector.stability_polls());
        if let Err(error) = &waited
            && needs_fresh_session(error)
        {
            self.sessions.mark_dead();
        }
        let completed = match waited {
            Ok(completed) => completed,
            Err(TaskError::TimedOut { elapsed }) => {
                // Nothing new arrived; the site may have refused a file we already hold
                let listing = self.list()?;
                if listing.new_since(&baseline).next().is_none()
                    && let Resolution::Skip { filename } =
                        resolve(&baseline, &listing, expected.as_deref())
                {
                    info!(filename = %filename, "no download started, matching file already present");
                    return Ok(self.skipped(task, filename, &listing));
                }
                return Err(TaskError::TimedOut { elapsed }.into());
            }
            Err(error) => return Err(error.into()),
        };
        step(task, TaskState::from(detector.state()));

        let filename = match resolve(&baseline, &completed.listing, expected.as_deref()) {
            Resolution::New { filename, .. } => filename,
            Resolution::Skip { filename } => {
                return Ok(self.skipped(task, filename, &completed.listing));
            }
            Resolution::Missing => return Err(TaskError::NoFileProduced.into()),
        };
        task.set_filename(&filename);

        step(task, TaskState::Verifying);
        let path = self.output_dir.join(&filename);
        let checksum = if self.config.verify_checksum {
            Some(checksum_file(path.clone()).await?)
        } else {
            IntegrityVerifier::ensure_complete(&path)?;
            None
        };
        let size = completed.listing.size(&filename).unwrap_or(completed.size);

        step(task, TaskState::Done);
        self.sessions.record_completion();
        info!(
            path = %path.display(),
            size,
            checksum = checksum.as_ref().map_or("-", Checksum::as_str),
            elapsed_ms = task.elapsed().as_millis(),
            "download complete"
        );
        Ok(TaskOutcome::Done(FileRecord {
            path,
            checksum,
            link,
            size,
        }))
    }

    /// Ends `task` as SKIPPED on a file that was in place before the trigger.
    fn skipped(&self, task: &mut DownloadTask, filename: String, listing: &Listing) -> TaskOutcome {
        task.set_filename(&filename);
        step(task, TaskState::Skipped);
        TaskOutcome::Skipped(FileRecord {
            path: self.output_dir.join(&filename),
            checksum: None,
            size: listing.size(&filename).unwrap_or_default(),
            link: task.link().clone(),
        })
    }

    fn list(&self) -> Result<Listing, TaskError> {
        self.observer
            .list()
            .map_err(|e| TaskError::observer(self.observer.root(), e))
    }

    fn failed(&self, task: &mut DownloadTask, error: TaskError) -> TaskOutcome {
        let elapsed = task.elapsed();
        warn!(
            url = %task.link(),
            reason = error.reason(),
            error = %error,
            elapsed_ms = elapsed.as_millis(),
            "download failed"
        );
        let failure = FailureRecord {
            link: task.link().clone(),
            reason: error.reason(),
            message: error.to_string(),
            elapsed,
        };
        task.fail(error);
        TaskOutcome::Failed(failure)
    }

    fn record(&mut self, outcome: TaskOutcome) {
        if self.config.write_manifest {
            match &outcome {
                TaskOutcome::Done(record) => self.manifest.record(record),
                TaskOutcome::Skipped(record) if self.manifest.get(record.link.key()).is_none() => {
                    self.manifest.record(record);
                }
                _ => {}
            }
        }
        if !self.stats.record(outcome.clone()) {
            return;
        }
        self.snapshots.send_replace(self.stats.snapshot());
        if let Some(sender) = &self.outcomes
            && sender.send(outcome).is_err()
        {
            trace!("outcome receiver dropped");
        }
    }

    /// Records the current and all remaining links as FAILED after a fatal
    /// session error and releases resources.
    async fn abort(
        &mut self,
        mut task: DownloadTask,
        remaining: Vec<Link>,
        source: SessionCreationError,
    ) -> RunError {
        warn!(error = %source, remaining = remaining.len(), "cannot start browser session, aborting run");
        let outcome = self.failed(
            &mut task,
            TaskError::SessionUnavailable(source.to_string()),
        );
        self.record(outcome);
        for link in remaining {
            let mut task = DownloadTask::new(link, &self.output_dir);
            let outcome = self.failed(
                &mut task,
                TaskError::SessionUnavailable("run aborted".to_string()),
            );
            self.record(outcome);
        }
        self.sessions.shutdown().await;
        self.save_manifest();
        RunError::SessionCreation {
            source,
            snapshot: Box::new(self.stats.snapshot()),
        }
    }

    fn save_manifest(&mut self) {
        if !self.config.write_manifest {
            return;
        }
        if let Err(e) = self.manifest.save() {
            warn!(error = %e, "cannot write manifest");
        }
    }
}

/// Stall recovery: dismiss overlays, then check for an expired session.
struct StallRecovery<'a> {
    driver: &'a mut dyn Automation,
}

#[async_trait]
impl StallHandler for StallRecovery<'_> {
    async fn on_stall(&mut self, state: DetectorState) -> StallVerdict {
        match self.driver.dismiss_overlay().await {
            Ok(true) => debug!(state = %state, "dismissed overlay on stall"),
            Ok(false) => {}
            Err(e) if e.indicates_dead_session() => return StallVerdict::Abort(e.into()),
            Err(e) => debug!(error = %e, "overlay dismissal failed"),
        }
        match self.driver.read_dom().await {
            Ok(document) if is_expired_page(&document) => {
                StallVerdict::Abort(TaskError::SessionExpired)
            }
            Ok(_) => StallVerdict::Continue,
            Err(e) if e.indicates_dead_session() => StallVerdict::Abort(e.into()),
            Err(e) => {
                debug!(error = %e, "session check failed");
                StallVerdict::Continue
            }
        }
    }
}

/// Starts the download for `link`: load the URL, then click the first
/// element accepted by a strategy, trying strategies in order.
async fn trigger(
    driver: &mut dyn Automation,
    link: &Link,
    strategies: &[SelectorStrategy],
) -> Result<(), TaskError> {
    driver.navigate(link.url()).await?;
    if link.is_direct_file() {
        debug!("direct file URL, navigation starts the download");
        return Ok(());
    }

    let document = driver.read_dom().await?;
    if is_expired_page(&document) {
        return Err(TaskError::SessionExpired);
    }
    if driver.dismiss_overlay().await? {
        debug!("dismissed overlay before clicking");
    }

    for strategy in strategies {
        let candidates = match driver.find_candidates(strategy.selectors).await {
            Ok(candidates) => candidates,
            Err(e) if e.indicates_dead_session() => return Err(e.into()),
            Err(e) => {
                debug!(strategy = strategy.name, error = %e, "candidate lookup failed");
                continue;
            }
        };
        let Some(element) = strategy.select(&candidates, link) else {
            trace!(strategy = strategy.name, candidates = candidates.len(), "no match");
            continue;
        };
        match driver.click(element).await {
            Ok(()) => {
                debug!(strategy = strategy.name, tag = %element.tag, "download triggered");
                return Ok(());
            }
            Err(e) if e.indicates_dead_session() => return Err(e.into()),
            Err(e) => debug!(strategy = strategy.name, error = %e, "click failed, trying next strategy"),
        }
    }
    Err(TaskError::no_actionable_element(link.url()))
}

fn needs_fresh_session(error: &TaskError) -> bool {
    match error {
        TaskError::SessionExpired => true,
        TaskError::Automation(e) => e.indicates_dead_session(),
        _ => false,
    }
}

/// Moves `task` forward, ignoring moves to a state it already passed.
fn step(task: &mut DownloadTask, next: TaskState) {
    if !next.is_terminal() && task.state() >= next {
        return;
    }
    if let Err(e) = task.advance(next) {
        debug!(error = %e, "task transition ignored");
    }
}

/// Hashes `path` off the async runtime.
async fn checksum_file(path: PathBuf) -> Result<Checksum, VerificationError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || IntegrityVerifier::verify(&target))
        .await
        .map_err(|e| VerificationError::io(&path, std::io::Error::other(e)))?
}
