//! Run configuration and the JSON settings file.
//!
//! Every field has a default, so a settings file may list only the options it
//! changes. Command-line flags are applied on top by the binary.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::download::{
    DEFAULT_INTER_DOWNLOAD_DELAY, DEFAULT_MAX_STALL_RECOVERIES, DEFAULT_MAX_WAIT,
    DEFAULT_SESSION_REFRESH_COUNT, DEFAULT_STALL_GRACE, DetectorSettings,
};
use crate::session::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Settings file looked up in the working directory when `--config` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "pagegrab.json";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read or written.
    #[error("cannot access settings file {path}: {source}")]
    Io {
        /// Settings file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`Config`].
    #[error("invalid settings file {path}: {source}")]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("Invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Option name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },

    /// No output directory was configured.
    #[error("no output directory configured (set `output_directory` or pass --output-dir)")]
    MissingOutputDirectory,
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Options for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory downloads land in. Required to run.
    pub output_directory: Option<PathBuf>,
    /// Maximum time to wait for one download.
    pub max_wait_seconds: u64,
    /// Completed downloads before the browser session is recycled.
    pub session_refresh_count: u32,
    /// Pause between downloads.
    pub inter_download_delay_seconds: f64,
    /// Run the browser without a window.
    pub headless: bool,
    /// Disable image loading in the browser.
    pub block_images: bool,
    /// Keep only download-looking links when scraping a page.
    pub filter_links: bool,
    /// Output directory poll interval.
    pub poll_interval_ms: u64,
    /// Idle time before a download counts as stalled.
    pub stall_grace_seconds: u64,
    /// Recovery attempts before a stalled download fails.
    pub max_stall_recoveries: u32,
    /// Attempts to start a browser session before the run fails.
    pub session_create_attempts: u32,
    /// Delete leftover incomplete downloads before the run.
    pub clean_incomplete: bool,
    /// Compute a checksum for each finished file.
    pub verify_checksum: bool,
    /// Record finished downloads in the output directory's manifest.
    pub write_manifest: bool,
    /// Chrome or Chromium binary. Detected on the system when unset.
    pub chrome_executable: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: None,
            max_wait_seconds: DEFAULT_MAX_WAIT.as_secs(),
            session_refresh_count: DEFAULT_SESSION_REFRESH_COUNT,
            inter_download_delay_seconds: DEFAULT_INTER_DOWNLOAD_DELAY.as_secs_f64(),
            headless: true,
            block_images: true,
            filter_links: false,
            poll_interval_ms: 500,
            stall_grace_seconds: DEFAULT_STALL_GRACE.as_secs(),
            max_stall_recoveries: DEFAULT_MAX_STALL_RECOVERIES,
            session_create_attempts: DEFAULT_MAX_ATTEMPTS,
            clean_incomplete: true,
            verify_checksum: true,
            write_manifest: true,
            chrome_executable: None,
        }
    }
}

impl Config {
    /// Loads settings from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "settings loaded");
        Ok(config)
    }

    /// Loads settings from `path`, or returns defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but is unreadable or invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes these settings to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, body + "\n").map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks value ranges. Does not require an output directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3600).contains(&self.max_wait_seconds) {
            return Err(ConfigError::out_of_range(
                "max_wait_seconds",
                self.max_wait_seconds,
                "1..=3600",
            ));
        }
        if !(1..=10_000).contains(&self.session_refresh_count) {
            return Err(ConfigError::out_of_range(
                "session_refresh_count",
                self.session_refresh_count,
                "1..=10000",
            ));
        }
        if !self.inter_download_delay_seconds.is_finite()
            || !(0.0..=600.0).contains(&self.inter_download_delay_seconds)
        {
            return Err(ConfigError::out_of_range(
                "inter_download_delay_seconds",
                self.inter_download_delay_seconds,
                "0.0..=600.0",
            ));
        }
        if !(50..=10_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::out_of_range(
                "poll_interval_ms",
                self.poll_interval_ms,
                "50..=10000",
            ));
        }
        if self.stall_grace_seconds > 3600 {
            return Err(ConfigError::out_of_range(
                "stall_grace_seconds",
                self.stall_grace_seconds,
                "0..=3600",
            ));
        }
        if self.max_stall_recoveries > 20 {
            return Err(ConfigError::out_of_range(
                "max_stall_recoveries",
                self.max_stall_recoveries,
                "0..=20",
            ));
        }
        if !(1..=10).contains(&self.session_create_attempts) {
            return Err(ConfigError::out_of_range(
                "session_create_attempts",
                self.session_create_attempts,
                "1..=10",
            ));
        }
        if let Some(path) = &self.chrome_executable
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::out_of_range(
                "chrome_executable",
                "\"\"",
                "a path to a Chrome binary",
            ));
        }
        Ok(())
    }

    /// The configured output directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingOutputDirectory`] when unset.
    pub fn output_directory(&self) -> Result<&Path, ConfigError> {
        self.output_directory
            .as_deref()
            .ok_or(ConfigError::MissingOutputDirectory)
    }

    /// Maximum wait per download.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    /// Pause between downloads. Invalid values count as zero.
    #[must_use]
    pub fn inter_download_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.inter_download_delay_seconds).unwrap_or_default()
    }

    /// Completion detector timing derived from these settings.
    #[must_use]
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.stall_grace_seconds),
            self.max_wait(),
            self.max_stall_recoveries,
        )
    }

    /// Backoff policy for session creation.
    #[must_use]
    pub fn session_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.session_create_attempts)
    }
}
