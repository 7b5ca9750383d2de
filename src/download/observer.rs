//! Filesystem observation of the output directory.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::filename::is_incomplete;

/// A snapshot of regular files in a directory: name to size in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    entries: BTreeMap<String, u64>,
}

impl Listing {
    /// Creates an empty listing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, name: impl Into<String>, size: u64) {
        self.entries.insert(name.into(), size);
    }

    /// Builder form of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, size: u64) -> Self {
        self.insert(name, size);
        self
    }

    /// True when a file named `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Size of `name`, if present.
    #[must_use]
    pub fn size(&self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    /// True when `name` is present and carries no incomplete marker.
    #[must_use]
    pub fn has_complete(&self, name: &str) -> bool {
        !is_incomplete(name) && self.contains(name)
    }

    /// Entries present here but absent from `baseline`.
    pub fn new_since<'a>(&'a self, baseline: &'a Listing) -> impl Iterator<Item = (&'a str, u64)> {
        self.entries
            .iter()
            .filter(|(name, _)| !baseline.entries.contains_key(*name))
            .map(|(name, size)| (name.as_str(), *size))
    }

    /// All entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, size)| (name.as_str(), *size))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the listing has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read access to the directory downloads land in.
///
/// Implementations must be cheap to call repeatedly; the completion detector
/// lists the directory on every poll.
pub trait DirectoryObserver: Send + Sync {
    /// The observed directory.
    fn root(&self) -> &Path;

    /// Lists regular files currently in the directory.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be read.
    fn list(&self) -> io::Result<Listing>;
}

/// Observes a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    /// Observes `root`. The directory does not need to exist yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DirectoryObserver for LocalDirectory {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> io::Result<Listing> {
        let mut listing = Listing::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            // Files can vanish between read_dir and metadata while the browser renames them
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            listing.insert(name, metadata.len());
        }
        Ok(listing)
    }
}

/// Deletes leftover incomplete-download files from `dir`.
///
/// Returns the names that were removed. Files that cannot be removed are
/// logged and skipped.
///
/// # Errors
///
/// Returns the IO error if the directory cannot be listed.
pub fn clean_incomplete_files(dir: &Path) -> io::Result<Vec<String>> {
    let listing = LocalDirectory::new(dir).list()?;
    let mut removed = Vec::new();
    for (name, _) in listing.iter().filter(|(name, _)| is_incomplete(name)) {
        let path = dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed incomplete download");
                removed.push(name.to_string());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove incomplete download"),
        }
    }
    Ok(removed)
}
