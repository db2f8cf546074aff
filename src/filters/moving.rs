use super::{FileFilter, Outcome, RunCounters};
use crate::classifier::AgeClassifier;
use crate::policy::ensure_writable_dir;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const BUFFER_SIZE: usize = 16 * 1024;

type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// Moves eligible files into the output directory
pub struct MoveFilter {
    classifier: AgeClassifier,
    target_dir: PathBuf,
    rename: RenameFn,
    counters: RunCounters,
}

impl MoveFilter {
    pub fn new(classifier: AgeClassifier, target_dir: PathBuf) -> Result<Self> {
        ensure_writable_dir(&target_dir, "Target")?;
        Ok(Self {
            classifier,
            target_dir,
            rename: |from, to| fs::rename(from, to),
            counters: RunCounters::default(),
        })
    }

    #[cfg(test)]
    fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    /// Rename into the target directory, copying across devices.
    ///
    /// Returns the number of bytes copied, 0 when the rename succeeded.
    fn move_file(&self, source: &Path) -> Result<u64> {
        let file_name = source
            .file_name()
            .with_context(|| format!("{} has no file name", source.display()))?;
        let target = self.target_dir.join(file_name);

        match (self.rename)(source, &target) {
            Ok(()) => return Ok(0),
            Err(e) => tracing::trace!("Moving {} via rename failed: {}", source.display(), e),
        }

        let copied = copy_contents(source, &target)
            .with_context(|| format!("Copy of {} to {} failed", source.display(), target.display()))?;

        fs::remove_file(source)
            .with_context(|| format!("Copied {} but could not remove the source", source.display()))?;

        tracing::trace!("File {} moved via copy & delete", source.display());
        Ok(copied)
    }
}

fn copy_contents(source: &Path, target: &Path) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(target)?);
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(copied)
}

impl FileFilter for MoveFilter {
    fn name(&self) -> &'static str {
        "MoveFilter"
    }

    fn classifier(&self) -> &AgeClassifier {
        &self.classifier
    }

    fn apply(&mut self, path: &Path, _timestamp_millis: i64) -> Result<Outcome> {
        let bytes = self.move_file(path)?;
        Ok(Outcome::Acted { bytes })
    }

    fn counters(&self) -> &RunCounters {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut RunCounters {
        &mut self.counters
    }
}
