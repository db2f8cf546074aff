use super::{FileFilter, Outcome, RunCounters};
use crate::archive::ArchiveWriter;
use crate::classifier::{AgeClassifier, file_name};
use crate::policy::DispositionRules;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Zips eligible files and removes the sources
pub struct ArchiveFilter {
    classifier: AgeClassifier,
    writer: ArchiveWriter,
    rules: DispositionRules,
    output_format: String,
    counters: RunCounters,
}

impl ArchiveFilter {
    pub fn new(classifier: AgeClassifier, writer: ArchiveWriter, rules: DispositionRules, output_format: &str) -> Self {
        Self {
            classifier,
            writer,
            rules,
            output_format: output_format.to_string(),
            counters: RunCounters::default(),
        }
    }

    pub fn writer(&self) -> &ArchiveWriter {
        &self.writer
    }

    /// Duplicate a live file to `<name>.<now>` next to it
    fn snapshot(&self, path: &Path) -> Result<PathBuf> {
        let name = file_name(path);
        let copy = path.with_file_name(format!("{name}.{}", Local::now().format(&self.output_format)));
        fs::copy(path, &copy)
            .with_context(|| format!("Cannot copy {} to {}", path.display(), copy.display()))?;
        tracing::debug!("Archiving copy {} of live file {}", copy.display(), path.display());
        Ok(copy)
    }
}

impl FileFilter for ArchiveFilter {
    fn name(&self) -> &'static str {
        "ArchiveFilter"
    }

    fn classifier(&self) -> &AgeClassifier {
        &self.classifier
    }

    fn apply(&mut self, path: &Path, timestamp_millis: i64) -> Result<Outcome> {
        let copied = self.rules.copies_before_archive(&file_name(path));
        let source = if copied { self.snapshot(path)? } else { path.to_path_buf() };

        let entry_name = file_name(&source);
        let bytes = match self.writer.append(&source, &entry_name, timestamp_millis) {
            Ok(bytes) => bytes,
            Err(e) => {
                if copied {
                    if let Err(remove_err) = fs::remove_file(&source) {
                        tracing::warn!("Cannot delete unarchived copy {}: {}", source.display(), remove_err);
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::remove_file(&source) {
            tracing::warn!("Archived {} but could not delete it: {}", source.display(), e);
        }

        Ok(Outcome::Acted { bytes })
    }

    fn counters(&self) -> &RunCounters {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut RunCounters {
        &mut self.counters
    }

    fn enter_group(&mut self, dir: &Path) {
        self.writer.set_output_dir(dir);
    }

    fn leave_group(&mut self) {
        self.writer.close();
    }

    fn finish(&mut self) {
        self.writer.close();
    }

    fn archives(&self) -> &[PathBuf] {
        self.writer.finalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Decision;
    use crate::filters::test_support::{classifier, write_aged};
    use crate::policy::{ArchivePolicy, NamingMode};
    use std::fs::File;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn filter(out_dir: &Path, max_entries: usize, days: u64) -> ArchiveFilter {
        let policy = ArchivePolicy {
            out_dir: out_dir.to_path_buf(),
            source_dir: out_dir.to_path_buf(),
            prefix: "arc".to_string(),
            naming: NamingMode::Sequence,
            output_format: "%Y%m%d%H%M%S".to_string(),
            max_entries,
            max_bytes: None,
        };
        ArchiveFilter::new(
            classifier(days),
            ArchiveWriter::new(&policy),
            DispositionRules::new([".tagfile"], ["catalina.out"], Vec::<String>::new()),
            &policy.output_format,
        )
    }

    #[test]
    fn test_archives_and_removes_old_files() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let old = input.path().join("old.log");
        let new = input.path().join("new.log");
        write_aged(&old, b"0123456789", 30);
        write_aged(&new, b"fresh", 0);

        let mut filter = filter(output.path(), 10, 7);
        assert_eq!(filter.decide(&old), Decision::Handled);
        assert_eq!(filter.decide(&new), Decision::Retained);
        filter.finish();

        assert!(!old.exists());
        assert!(new.exists());
        assert_eq!(filter.counters().bytes_transferred, 10);
        assert_eq!(filter.counters().files_acted_on, 1);

        let archive_path = output.path().join("arc1.zip");
        let archive = ZipArchive::new(File::open(archive_path).unwrap()).unwrap();
        assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["old.log"]);
    }

    #[test]
    fn test_live_log_is_copied_not_removed() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let live = input.path().join("catalina.out");
        write_aged(&live, b"server output", 30);

        let mut filter = filter(output.path(), 10, 7);
        assert_eq!(filter.decide(&live), Decision::Handled);
        filter.finish();

        assert_eq!(fs::read(&live).unwrap(), b"server output");
        assert_eq!(fs::read_dir(input.path()).unwrap().count(), 1);

        let archive = ZipArchive::new(File::open(output.path().join("arc1.zip")).unwrap()).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("catalina.out."));
    }

    #[test]
    fn test_failed_append_drops_the_copy() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let live = input.path().join("catalina.out");
        write_aged(&live, b"server output", 30);

        let mut filter = filter(&output.path().join("missing"), 10, 7);
        assert_eq!(filter.decide(&live), Decision::Retained);
        filter.finish();

        let remaining: Vec<_> = fs::read_dir(input.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec!["catalina.out"]);
        assert_eq!(fs::read(&live).unwrap(), b"server output");
        assert_eq!(filter.counters().files_acted_on, 0);
    }

    #[test]
    fn test_groups_finalize_on_leave() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let group = TempDir::new().unwrap();
        let file = input.path().join("a.xml");
        write_aged(&file, b"a", 30);

        let mut filter = filter(output.path(), 10, 7);
        filter.enter_group(group.path());
        filter.decide(&file);
        filter.leave_group();

        assert!(group.path().join("arc1.zip").is_file());
        assert_eq!(filter.writer().finalized().len(), 1);
    }
}
