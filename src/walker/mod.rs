//! Directory traversal
//!
//! Walkers list directories with `walkdir` and hand every file to a
//! [`FileFilter`]. They never fail: a directory that cannot be listed is
//! logged and its branch is abandoned while siblings continue.

use crate::filters::FileFilter;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

mod failed;
mod mounts;

pub use failed::FailedSubtreeWalker;
pub use mounts::{MountLayout, MountPoints};

/// Directory-level statistics of one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories_listed: u64,
    pub directories_pruned: u64,
    pub branches_skipped: u64,
}

impl AddAssign for WalkStats {
    fn add_assign(&mut self, other: Self) {
        self.directories_listed += other.directories_listed;
        self.directories_pruned += other.directories_pruned;
        self.branches_skipped += other.branches_skipped;
    }
}

/// Bounded-depth walk with optional post-order pruning.
///
/// The root is depth 0. A directory is listed when its depth is at most
/// `max_depth`, so files inside a directory at depth `max_depth` are the
/// deepest ones ever decided. With pruning on, every listed directory left
/// empty after its files were handled is removed, the root included.
#[derive(Debug, Clone, Copy)]
pub struct TreeWalker {
    pub max_depth: usize,
    pub prune_empty: bool,
}

impl TreeWalker {
    pub fn new(max_depth: usize, prune_empty: bool) -> Self {
        Self { max_depth, prune_empty }
    }

    pub fn walk(&self, root: &Path, filter: &mut dyn FileFilter) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut unreadable = HashSet::new();

        // Entries of a directory sit one level below it
        let entries = WalkDir::new(root)
            .max_depth(self.max_depth + 1)
            .sort_by_file_name()
            .contents_first(true);

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    unreadable.extend(skip_branch(&e, &mut stats));
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                filter.decide(entry.path());
                continue;
            }
            if entry.depth() > self.max_depth || unreadable.contains(entry.path()) {
                continue;
            }

            tracing::debug!("Managed directory {}", entry.path().display());
            stats.directories_listed += 1;
            if self.prune_empty {
                prune_if_empty(entry.path(), &mut stats);
            }
        }
        stats
    }
}

/// Log a traversal error and count the abandoned branch.
///
/// Returns the path the error refers to, if any.
pub(crate) fn skip_branch(err: &walkdir::Error, stats: &mut WalkStats) -> Option<PathBuf> {
    stats.branches_skipped += 1;
    match err.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::NotFound) => tracing::debug!("Skipping missing branch: {}", err),
        _ => tracing::warn!("Skipping unreadable branch: {}", err),
    }
    err.path().map(Path::to_path_buf)
}

fn prune_if_empty(dir: &Path, stats: &mut WalkStats) {
    match fs::read_dir(dir) {
        Ok(mut remaining) => {
            if remaining.next().is_some() {
                tracing::trace!("Directory {} is not empty", dir.display());
                return;
            }
        }
        Err(e) => {
            tracing::warn!("Empty check failed for {}: {}", dir.display(), e);
            return;
        }
    }

    match fs::remove_dir(dir) {
        Ok(()) => {
            tracing::info!("Directory {} deleted", dir.display());
            stats.directories_pruned += 1;
        }
        Err(e) => tracing::warn!("Cannot delete directory {}: {}", dir.display(), e),
    }
}
