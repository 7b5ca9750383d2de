//! Browser session lifecycle: creation, proactive refresh and replacement.
//!
//! [`SessionManager`] owns at most one live [`Session`]. A session is
//! replaced when it reaches the refresh threshold of completed downloads or
//! when the engine marks it dead (expired login, stale handles). The old
//! session is always closed before its replacement is handed out.

mod retry;

pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::automation::{Automation, AutomationError, Document, SessionFactory};

/// URL fragments of login and session-expiry pages.
const EXPIRED_URL_MARKERS: &[&str] = &[
    "/login",
    "/signin",
    "/sign-in",
    "/sign_in",
    "session-expired",
    "session_expired",
    "sessionexpired",
];

/// Page wording that signals the site dropped the session.
const EXPIRED_TEXT_MARKERS: &[&str] = &[
    "session expired",
    "session has expired",
    "your session timed out",
    "please log in",
    "please sign in",
    "login required",
];

/// Session creation failed after exhausting its retry budget. Fatal for the run.
#[derive(Debug, Clone, Error)]
#[error("could not start a browser session after {attempts} attempt(s): {source}")]
pub struct SessionCreationError {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the last attempt.
    #[source]
    pub source: AutomationError,
}

/// Identity of a session within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One live browser-automation context.
pub struct Session {
    id: SessionId,
    created_at: Instant,
    completed: u32,
    alive: bool,
    driver: Box<dyn Automation>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("completed", &self.completed)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Completed downloads since creation.
    #[must_use]
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// False once marked dead.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Time since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The automation handle.
    pub fn driver(&mut self) -> &mut dyn Automation {
        self.driver.as_mut()
    }

    fn is_usable(&self, refresh_threshold: u32) -> bool {
        self.alive && self.completed < refresh_threshold
    }
}

/// Guarantees a usable session at time of use.
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    refresh_threshold: u32,
    retry: RetryPolicy,
    next_id: u64,
    current: Option<Session>,
    cancel: CancellationToken,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("refresh_threshold", &self.refresh_threshold)
            .field("retry", &self.retry)
            .field("sessions_created", &self.next_id)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager. `refresh_threshold` is raised to at least 1.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, refresh_threshold: u32, retry: RetryPolicy) -> Self {
        Self {
            factory,
            refresh_threshold: refresh_threshold.max(1),
            retry,
            next_id: 0,
            current: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to cut creation backoff short.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Completions after which a session is recycled.
    #[must_use]
    pub fn refresh_threshold(&self) -> u32 {
        self.refresh_threshold
    }

    /// Sessions created so far.
    #[must_use]
    pub fn sessions_created(&self) -> u64 {
        self.next_id
    }

    /// Returns the current session if it is alive and below the refresh
    /// threshold; otherwise closes it and creates a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCreationError`] when the factory keeps failing past
    /// the retry budget, or with the last failure when cancellation fires
    /// during backoff.
    pub async fn ensure_alive(&mut self) -> Result<&mut Session, SessionCreationError> {
        let session = match self.current.take() {
            Some(session) if session.is_usable(self.refresh_threshold) => session,
            stale => {
                if let Some(old) = stale {
                    debug!(
                        session = %old.id,
                        completed = old.completed,
                        alive = old.alive,
                        "replacing session"
                    );
                    release(old).await;
                }
                self.create_with_retry().await?
            }
        };
        Ok(self.current.insert(session))
    }

    /// Counts a completed download on the current session. At the threshold
    /// the session is due for refresh on the next [`Self::ensure_alive`].
    pub fn record_completion(&mut self) {
        let threshold = self.refresh_threshold;
        if let Some(session) = self.current.as_mut() {
            session.completed = (session.completed + 1).min(threshold);
            if session.completed >= threshold {
                debug!(session = %session.id, threshold, "session due for refresh");
            }
        }
    }

    /// Forces a refresh on next use.
    pub fn mark_dead(&mut self) {
        if let Some(session) = self.current.as_mut()
            && session.alive
        {
            info!(session = %session.id, "session marked dead");
            session.alive = false;
        }
    }

    /// The current session, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Mutable access to the current session, if any.
    pub fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.as_mut()
    }

    /// Closes the current session, if any.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.current.take() {
            debug!(session = %session.id, "shutting down session");
            release(session).await;
        }
    }

    #[instrument(skip(self), fields(max_attempts = self.retry.max_attempts()))]
    async fn create_with_retry(&mut self) -> Result<Session, SessionCreationError> {
        let mut attempt = 1;
        loop {
            match self.factory.create().await {
                Ok(driver) => {
                    self.next_id += 1;
                    let id = SessionId(self.next_id);
                    info!(session = %id, attempt, "browser session started");
                    return Ok(Session {
                        id,
                        created_at: Instant::now(),
                        completed: 0,
                        alive: true,
                        driver,
                    });
                }
                Err(source) => match self.retry.should_retry(attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %source,
                            "session creation failed, retrying"
                        );
                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                info!(attempt, "session creation cancelled during backoff");
                                return Err(SessionCreationError {
                                    attempts: attempt,
                                    source,
                                });
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(attempt, error = %source, reason = %reason, "session creation failed");
                        return Err(SessionCreationError {
                            attempts: attempt,
                            source,
                        });
                    }
                },
            }
        }
    }
}

async fn release(mut session: Session) {
    if let Err(e) = session.driver.close().await {
        warn!(session = %session.id, error = %e, "failed to close browser session");
    }
}

/// Returns true when `document` looks like a login or session-expired page.
#[must_use]
pub fn is_expired_page(document: &Document) -> bool {
    let url = document.url.to_lowercase();
    if EXPIRED_URL_MARKERS.iter().any(|marker| url.contains(marker)) {
        return true;
    }
    let html = document.html.to_lowercase();
    EXPIRED_TEXT_MARKERS
        .iter()
        .any(|marker| html.contains(marker))
}
