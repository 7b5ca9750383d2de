//! Content checksums for finished downloads.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::constants::CHECKSUM_BUFFER_SIZE;
use super::error::VerificationError;
use super::filename::is_incomplete;

/// Lowercase hex SHA-256 digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Wraps an existing hex digest (e.g. one read from a manifest).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes and checks checksums of completed files.
///
/// Never hashes a path that still carries an incomplete-download marker.
/// Hashing an unchanged file always yields the same checksum.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Computes the checksum of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::Incomplete`] for marker-suffixed paths,
    /// [`VerificationError::Missing`] when the file does not exist, and
    /// [`VerificationError::Io`] on read failures.
    pub fn verify(path: &Path) -> Result<Checksum, VerificationError> {
        Self::ensure_complete(path)?;
        let mut file = File::open(path).map_err(|e| classify(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; CHECKSUM_BUFFER_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| VerificationError::io(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Checksum(hex_encode(&hasher.finalize())))
    }

    /// Checks that `path` is a finished regular file without hashing it.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::Incomplete`] or [`VerificationError::Missing`].
    pub fn ensure_complete(path: &Path) -> Result<(), VerificationError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if is_incomplete(&name) {
            return Err(VerificationError::incomplete(path));
        }
        if !path.is_file() {
            return Err(VerificationError::missing(path));
        }
        Ok(())
    }

    /// Recomputes the checksum of `path` and compares it with `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::Mismatch`] when the bytes changed, or any
    /// error from [`Self::verify`].
    pub fn check(path: &Path, expected: &Checksum) -> Result<(), VerificationError> {
        let actual = Self::verify(path)?;
        if &actual == expected {
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

fn classify(path: &Path, error: std::io::Error) -> VerificationError {
    if error.kind() == ErrorKind::NotFound {
        VerificationError::missing(path)
    } else {
        VerificationError::io(path, error)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
