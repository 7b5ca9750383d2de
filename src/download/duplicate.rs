//! Attributing a finished download to the right file on disk.

use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{debug, warn};

use super::filename::{base_name, is_incomplete};
use super::observer::Listing;

/// More than one new file appeared after a single trigger.
///
/// Never fatal: the resolver picks a best match and reports this alongside.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} new files after one download, picked {chosen}", .candidates.len())]
pub struct DuplicateAmbiguity {
    /// All new complete files, in name order.
    pub candidates: Vec<String>,
    /// The file chosen.
    pub chosen: String,
}

/// Outcome of comparing the directory before and after a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A new file was produced.
    New {
        /// The file attributed to the task.
        filename: String,
        /// Present when several new files competed.
        ambiguity: Option<DuplicateAmbiguity>,
    },
    /// No new file, but the expected file already existed before the trigger.
    Skip {
        /// The pre-existing file.
        filename: String,
    },
    /// No new file and nothing to fall back on.
    Missing,
}

/// Decides which file, if any, a completed download produced.
///
/// Browser-renamed collisions (`movie (1).rar` next to a pre-existing
/// `movie.rar`) are new files: only names absent from `before` count.
///
/// With nothing new, a file in `before` sharing the expected base name gives
/// [`Resolution::Skip`]. The engine relies on this when a download times out
/// without producing anything.
#[must_use]
pub fn resolve(before: &Listing, after: &Listing, expected: Option<&str>) -> Resolution {
    let mut fresh: Vec<&str> = after
        .new_since(before)
        .map(|(name, _)| name)
        .filter(|name| !is_incomplete(name))
        .collect();

    match fresh.len() {
        0 => {
            let existing = expected.and_then(|expected| {
                let expected_base = base_name(expected);
                before
                    .iter()
                    .map(|(name, _)| name)
                    .find(|name| !is_incomplete(name) && base_name(name) == expected_base)
            });
            match existing {
                Some(name) => {
                    debug!(filename = name, "no new file; expected file already present");
                    Resolution::Skip {
                        filename: name.to_string(),
                    }
                }
                None => Resolution::Missing,
            }
        }
        1 => Resolution::New {
            filename: fresh[0].to_string(),
            ambiguity: None,
        },
        _ => {
            fresh.sort_unstable();
            let chosen = best_match(&fresh, after, expected);
            let ambiguity = DuplicateAmbiguity {
                candidates: fresh.iter().map(|name| (*name).to_string()).collect(),
                chosen: chosen.to_string(),
            };
            warn!(
                candidates = ?ambiguity.candidates,
                chosen,
                "ambiguous download result"
            );
            Resolution::New {
                filename: chosen.to_string(),
                ambiguity: Some(ambiguity),
            }
        }
    }
}

/// Closest base name to `expected` by normalized edit distance; without an
/// expected name, the largest file.
fn best_match<'a>(fresh: &[&'a str], after: &Listing, expected: Option<&str>) -> &'a str {
    let by_size = |name: &&str| after.size(name).unwrap_or(0);
    let chosen = match expected {
        Some(expected) => {
            let expected_base = base_name(expected);
            fresh.iter().copied().max_by(|a, b| {
                let score_a = normalized_levenshtein(&base_name(a), &expected_base);
                let score_b = normalized_levenshtein(&base_name(b), &expected_base);
                score_a
                    .total_cmp(&score_b)
                    .then_with(|| by_size(a).cmp(&by_size(b)))
            })
        }
        None => fresh.iter().copied().max_by_key(by_size),
    };
    chosen.unwrap_or(fresh[0])
}
