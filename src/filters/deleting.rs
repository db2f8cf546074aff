use super::{FileFilter, Outcome, RunCounters};
use crate::classifier::{AgeClassifier, file_name};
use crate::policy::DispositionRules;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Deletes eligible files, except names the rules exempt
pub struct DeleteFilter {
    classifier: AgeClassifier,
    rules: DispositionRules,
    counters: RunCounters,
}

impl DeleteFilter {
    pub fn new(classifier: AgeClassifier, rules: DispositionRules) -> Self {
        Self {
            classifier,
            rules,
            counters: RunCounters::default(),
        }
    }
}

impl FileFilter for DeleteFilter {
    fn name(&self) -> &'static str {
        "DeleteFilter"
    }

    fn classifier(&self) -> &AgeClassifier {
        &self.classifier
    }

    fn apply(&mut self, path: &Path, _timestamp_millis: i64) -> Result<Outcome> {
        if self.rules.is_exempt(&file_name(path)) {
            return Ok(Outcome::Exempt);
        }

        fs::remove_file(path).with_context(|| format!("Cannot delete file {}", path.display()))?;
        tracing::trace!("Deleted {}", path.display());
        Ok(Outcome::Acted { bytes: 0 })
    }

    fn counters(&self) -> &RunCounters {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut RunCounters {
        &mut self.counters
    }
}
