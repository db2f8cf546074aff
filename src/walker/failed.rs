use super::{WalkStats, skip_branch};
use crate::filters::FileFilter;
use crate::policy::DispositionRules;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const TECH_PACK_DEPTH: usize = 1;
const FAILED_DIR_DEPTH: usize = 2;
const FILE_DEPTH: usize = 3;

/// Walks `<base>/<tech pack>/<failed dir>` and nothing else.
///
/// Only children of a tech pack directory whose name contains the marker are
/// listed, and only their direct files are decided. Each failed directory is a
/// group for the filter.
pub struct FailedSubtreeWalker {
    marker: String,
    candidates: Option<DispositionRules>,
}

impl FailedSubtreeWalker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            candidates: None,
        }
    }

    /// Restrict decided files to names the rules accept as failed candidates
    pub fn with_candidates(mut self, rules: DispositionRules) -> Self {
        self.candidates = Some(rules);
        self
    }

    pub fn walk(&self, base: &Path, filter: &mut dyn FileFilter) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut in_group = false;

        let entries = WalkDir::new(base)
            .min_depth(TECH_PACK_DEPTH)
            .max_depth(FILE_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| self.in_layout(entry));

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    skip_branch(&e, &mut stats);
                    continue;
                }
            };

            if entry.depth() < FILE_DEPTH {
                if in_group {
                    filter.leave_group();
                    in_group = false;
                }
                if entry.depth() == FAILED_DIR_DEPTH {
                    tracing::debug!("Managing failed directory {}", entry.path().display());
                    stats.directories_listed += 1;
                    filter.enter_group(entry.path());
                    in_group = true;
                }
                continue;
            }

            if self.accepts(&entry) {
                filter.decide(entry.path());
            }
        }

        if in_group {
            filter.leave_group();
        }
        stats
    }

    fn in_layout(&self, entry: &DirEntry) -> bool {
        match entry.depth() {
            TECH_PACK_DEPTH => entry.file_type().is_dir(),
            FAILED_DIR_DEPTH => {
                entry.file_type().is_dir() && entry.file_name().to_string_lossy().contains(&self.marker)
            }
            _ => true,
        }
    }

    fn accepts(&self, entry: &DirEntry) -> bool {
        !entry.file_type().is_dir()
            && self
                .candidates
                .as_ref()
                .is_none_or(|rules| rules.is_failed_candidate(&entry.file_name().to_string_lossy()))
    }
}
