//! Constants for the download module (markers, polling cadence, defaults).

use std::time::Duration;

/// Filename suffixes browsers use while a download is still being written.
pub const INCOMPLETE_MARKERS: [&str; 4] = [".crdownload", ".part", ".partial", ".tmp"];

/// Default filesystem poll interval for completion detection.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default maximum time to wait for one download.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(20);

/// Default idle period after which a download counts as stalled.
pub const DEFAULT_STALL_GRACE: Duration = Duration::from_secs(8);

/// Default number of recovery attempts before a stalled download fails.
pub const DEFAULT_MAX_STALL_RECOVERIES: u32 = 2;

/// Default number of completed downloads before the browser session is recycled.
pub const DEFAULT_SESSION_REFRESH_COUNT: u32 = 10;

/// Default pause between downloads.
pub const DEFAULT_INTER_DOWNLOAD_DELAY: Duration = Duration::from_secs(2);

/// Read buffer size for checksum computation.
pub const CHECKSUM_BUFFER_SIZE: usize = 64 * 1024;
