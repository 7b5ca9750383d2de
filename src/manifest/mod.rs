//! Sidecar manifest of finished downloads in an output directory.
//!
//! `.pagegrab-manifest.json` maps each link's normalized URL to the file it
//! produced, with checksum and size. A later run loads it to skip links whose
//! recorded file is still on disk, even when the saved name differs from the
//! URL-derived one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::download::Checksum;
use crate::stats::FileRecord;

/// Manifest filename inside the output directory.
pub const MANIFEST_FILE_NAME: &str = ".pagegrab-manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Errors produced while reading or writing the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// I/O error on the manifest file.
    #[error("I/O error on manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The manifest is not valid JSON or cannot be serialized.
    #[error("manifest {path} is not valid JSON: {source}")]
    Serialize {
        /// Manifest path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// One recorded download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Link URL as given.
    pub url: String,
    /// Filename inside the output directory.
    pub filename: String,
    /// Checksum, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Size in bytes.
    pub size: u64,
    /// Unix timestamp (seconds) of the recording.
    pub recorded_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, ManifestEntry>,
}

/// The manifest of one output directory.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: BTreeMap<String, ManifestEntry>,
    dirty: bool,
}

impl Manifest {
    /// Creates an empty manifest for `output_dir`.
    #[must_use]
    pub fn empty(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(MANIFEST_FILE_NAME),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Loads the manifest of `output_dir`; a missing file yields an empty manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file exists but cannot be read or parsed.
    #[instrument(fields(dir = %output_dir.display()))]
    pub fn load(output_dir: &Path) -> Result<Self, ManifestError> {
        let mut manifest = Self::empty(output_dir);
        let raw = match fs::read_to_string(&manifest.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(manifest),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: manifest.path,
                    source,
                });
            }
        };
        let file: ManifestFile =
            serde_json::from_str(&raw).map_err(|source| ManifestError::Serialize {
                path: manifest.path.clone(),
                source,
            })?;
        if file.version != MANIFEST_VERSION {
            warn!(version = file.version, "unknown manifest version, reading anyway");
        }
        manifest.entries = file.entries;
        debug!(entries = manifest.entries.len(), "manifest loaded");
        Ok(manifest)
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry for a link key (see [`crate::link::Link::key`]).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a finished file under its link's key.
    pub fn record(&mut self, record: &FileRecord) {
        let Some(filename) = record
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            return;
        };
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.entries.insert(
            record.link.key().to_string(),
            ManifestEntry {
                url: record.link.url().to_string(),
                filename,
                checksum: record.checksum.clone(),
                size: record.size,
                recorded_at,
            },
        );
        self.dirty = true;
    }

    /// Writes the manifest if it changed since loading.
    ///
    /// Writes to a temporary file first, then renames it into place.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] on I/O or serialization failure.
    pub fn save(&mut self) -> Result<(), ManifestError> {
        if !self.dirty {
            return Ok(());
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ManifestError::Io { path, source }
        };

        let file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        let mut writer = BufWriter::new(file);
        let body = ManifestFile {
            version: MANIFEST_VERSION,
            entries: self.entries.clone(),
        };
        serde_json::to_writer_pretty(&mut writer, &body).map_err(|source| {
            ManifestError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(io_err(&tmp_path))?;
        drop(writer);
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "manifest saved");
        Ok(())
    }
}
