//! File filters: one per disposition
//!
//! A filter is consulted for every entry the walker lists. The provided
//! [`FileFilter::decide`] composes the pure classification step with the
//! disposition-specific side effect, and is the boundary where per-file
//! failures are turned into log records.

use crate::classifier::AgeClassifier;
use anyhow::Result;
use std::path::{Path, PathBuf};

mod archiving;
mod deleting;
mod moving;

pub use archiving::ArchiveFilter;
pub use deleting::DeleteFilter;
pub use moving::MoveFilter;

/// What happened to one listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A directory; the walker decides whether to recurse into it
    Descend,
    /// A file left where it is
    Retained,
    /// A file the disposition took care of; it is gone from the listing
    Handled,
}

/// Result of a successful disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The file was moved, archived or deleted
    Acted { bytes: u64 },
    /// The file was eligible but is protected by name
    Exempt,
}

/// Counters owned by one filter for the duration of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total_files_seen: u64,
    pub files_acted_on: u64,
    pub bytes_transferred: u64,
}

/// Disposition applied to files found by a walker
pub trait FileFilter {
    /// Name of this filter for logging
    fn name(&self) -> &'static str;

    fn classifier(&self) -> &AgeClassifier;

    /// Perform the disposition on an eligible file
    fn apply(&mut self, path: &Path, timestamp_millis: i64) -> Result<Outcome>;

    fn counters(&self) -> &RunCounters;

    fn counters_mut(&mut self) -> &mut RunCounters;

    /// Called before the entries of a directory group are decided
    fn enter_group(&mut self, _dir: &Path) {}

    /// Called once all entries of a directory group were decided
    fn leave_group(&mut self) {}

    /// Called once at the end of the run
    fn finish(&mut self) {}

    /// Archives finalized so far
    fn archives(&self) -> &[PathBuf] {
        &[]
    }

    /// Classify a listed entry and act on it when eligible.
    ///
    /// Never fails: errors are logged and the entry is retained.
    fn decide(&mut self, path: &Path) -> Decision {
        if path.is_dir() {
            return Decision::Descend;
        }

        self.counters_mut().total_files_seen += 1;

        let classification = match self.classifier().classify(path) {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!("{} failed to classify {}: {:#}", self.name(), path.display(), e);
                return Decision::Retained;
            }
        };

        if !classification.eligible {
            tracing::trace!("{} is not eligible", path.display());
            return Decision::Retained;
        }

        match self.apply(path, classification.effective_timestamp_millis) {
            Ok(Outcome::Acted { bytes }) => {
                let counters = self.counters_mut();
                counters.files_acted_on += 1;
                counters.bytes_transferred += bytes;
                Decision::Handled
            }
            Ok(Outcome::Exempt) => {
                tracing::debug!("{} is exempt from {}", path.display(), self.name());
                Decision::Retained
            }
            Err(e) => {
                tracing::warn!("{} failed for {}: {:#}", self.name(), path.display(), e);
                Decision::Retained
            }
        }
    }
}
