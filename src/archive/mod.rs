//! Zip archive segments
//!
//! An [`ArchiveWriter`] streams files into a temporary zip in the output
//! directory. When the open segment reaches its entry or byte limit it is
//! finalized and a new one is started. Finalizing renames the temporary file
//! to its final name, which depends on the [`NamingMode`].
//!
//! Archiving is not transactional. Sources are removed by the caller as soon
//! as their entry is written, so a crash between the write and [`ArchiveWriter::close`]
//! leaves the data only in a `diskmanager_tmp_*.zip` file.

use crate::policy::{ArchivePolicy, NamingMode};
use anyhow::{Context, Result};
use chrono::{Datelike, Local, TimeZone, Timelike};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

mod naming;

pub use naming::{final_name, format_millis, temp_name};

/// Fastest deflate setting
const COMPRESSION_LEVEL: i64 = 1;

/// Entries at or above this size need zip64 headers
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

struct OpenArchive {
    writer: ZipWriter<BufWriter<File>>,
    entry_count: usize,
    bytes_written: u64,
    sequence_number: u32,
    min_timestamp: i64,
    max_timestamp: i64,
    temp_path: PathBuf,
}

impl OpenArchive {
    fn is_full(&self, max_entries: usize, max_bytes: Option<u64>) -> bool {
        self.entry_count >= max_entries || max_bytes.is_some_and(|limit| self.bytes_written >= limit)
    }
}

/// Writes archive segments and remembers the ones it finalized
pub struct ArchiveWriter {
    out_dir: PathBuf,
    prefix: String,
    naming: NamingMode,
    output_format: String,
    max_entries: usize,
    max_bytes: Option<u64>,
    last_sequence: u32,
    open: Option<OpenArchive>,
    finalized: Vec<PathBuf>,
}

impl ArchiveWriter {
    pub fn new(policy: &ArchivePolicy) -> Self {
        Self {
            out_dir: policy.out_dir.clone(),
            prefix: policy.prefix.clone(),
            naming: policy.naming,
            output_format: policy.output_format.clone(),
            max_entries: policy.max_entries.max(1),
            max_bytes: policy.max_bytes,
            last_sequence: 0,
            open: None,
            finalized: Vec::new(),
        }
    }

    /// Segments opened from now on are written into `dir`.
    ///
    /// A segment that is already open is finalized first.
    pub fn set_output_dir(&mut self, dir: &Path) {
        if self.out_dir != dir {
            self.close();
            self.out_dir = dir.to_path_buf();
        }
    }

    /// Finalized archives in the order they were renamed
    pub fn finalized(&self) -> &[PathBuf] {
        &self.finalized
    }

    /// Number of entries in the open segment
    pub fn open_entries(&self) -> usize {
        self.open.as_ref().map_or(0, |open| open.entry_count)
    }

    /// Stream `source` into the archive as `entry_name`.
    ///
    /// Rolls to a new segment when the open one is full. Returns the number of
    /// uncompressed bytes written.
    pub fn append(&mut self, source: &Path, entry_name: &str, timestamp_millis: i64) -> Result<u64> {
        if self
            .open
            .as_ref()
            .is_some_and(|open| open.is_full(self.max_entries, self.max_bytes))
        {
            tracing::debug!("Archive segment is full, rolling over");
            self.close();
        }

        let mut reader = BufReader::new(
            File::open(source).with_context(|| format!("Cannot open {} for archiving", source.display()))?,
        );
        let size = reader.get_ref().metadata().map(|m| m.len()).unwrap_or(0);

        let open = match self.open.take() {
            Some(open) => open,
            None => self.start_segment()?,
        };
        let open = self.open.insert(open);

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(COMPRESSION_LEVEL))
            .large_file(size >= LARGE_FILE_THRESHOLD)
            .last_modified_time(entry_time(timestamp_millis));

        open.writer
            .start_file(entry_name, options)
            .with_context(|| format!("Cannot add entry {entry_name} to {}", open.temp_path.display()))?;

        let copied = match io::copy(&mut reader, &mut open.writer) {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(abort_err) = open.writer.abort_file() {
                    tracing::warn!("Could not discard partial entry {}: {}", entry_name, abort_err);
                }
                return Err(e).with_context(|| format!("Cannot write {} into archive", source.display()));
            }
        };

        if open.entry_count == 0 {
            open.min_timestamp = timestamp_millis;
            open.max_timestamp = timestamp_millis;
        } else {
            open.min_timestamp = open.min_timestamp.min(timestamp_millis);
            open.max_timestamp = open.max_timestamp.max(timestamp_millis);
        }
        open.entry_count += 1;
        open.bytes_written += copied;

        tracing::trace!("Archived {} as {} ({} B)", source.display(), entry_name, copied);
        Ok(copied)
    }

    fn start_segment(&mut self) -> Result<OpenArchive> {
        let sequence_number = self.last_sequence + 1;
        let temp_path = self
            .out_dir
            .join(temp_name(&self.output_format, sequence_number, Local::now()));

        let file = File::create(&temp_path)
            .with_context(|| format!("Cannot create archive {}", temp_path.display()))?;
        self.last_sequence = sequence_number;

        tracing::debug!("Opened archive segment {}", temp_path.display());
        Ok(OpenArchive {
            writer: ZipWriter::new(BufWriter::new(file)),
            entry_count: 0,
            bytes_written: 0,
            sequence_number,
            min_timestamp: 0,
            max_timestamp: 0,
            temp_path,
        })
    }

    /// Finalize the open segment, if any.
    ///
    /// Errors are logged. Sources already archived are not restored.
    pub fn close(&mut self) -> Option<PathBuf> {
        let open = self.open.take()?;
        let temp_path = open.temp_path.clone();

        match self.finalize(open) {
            Ok(path) => {
                tracing::info!("Finalized archive {}", path.display());
                self.finalized.push(path.clone());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Finalizing archive {} failed: {:#}", temp_path.display(), e);
                None
            }
        }
    }

    fn finalize(&self, open: OpenArchive) -> Result<PathBuf> {
        let OpenArchive {
            writer,
            sequence_number,
            min_timestamp,
            max_timestamp,
            temp_path,
            ..
        } = open;

        let mut buffered = writer.finish().context("Cannot write zip central directory")?;
        io::Write::flush(&mut buffered).context("Cannot flush archive")?;
        drop(buffered);

        let name = final_name(
            &self.prefix,
            self.naming,
            &self.output_format,
            sequence_number,
            min_timestamp,
            max_timestamp,
            Local::now(),
        );
        let target = temp_path.with_file_name(name);

        if target.exists() {
            tracing::debug!("Replacing existing archive {}", target.display());
            fs::remove_file(&target).with_context(|| format!("Cannot replace {}", target.display()))?;
        }
        fs::rename(&temp_path, &target)
            .with_context(|| format!("Cannot rename {} to {}", temp_path.display(), target.display()))?;
        Ok(target)
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.open.is_some() {
            self.close();
        }
    }
}

/// Zip entries cannot represent times before 1980; those get the zip epoch
fn entry_time(timestamp_millis: i64) -> zip::DateTime {
    Local
        .timestamp_millis_opt(timestamp_millis)
        .earliest()
        .and_then(|t| {
            zip::DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn policy(out_dir: &Path, naming: NamingMode, max_entries: usize) -> ArchivePolicy {
        ArchivePolicy {
            out_dir: out_dir.to_path_buf(),
            source_dir: out_dir.to_path_buf(),
            prefix: "dm_".to_string(),
            naming,
            output_format: "%Y%m%d%H%M%S".to_string(),
            max_entries,
            max_bytes: None,
        }
    }

    fn sources(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("file{i}.txt"));
                fs::write(&path, format!("payload {i}")).unwrap();
                path
            })
            .collect()
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn test_rolls_after_max_entries() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::Sequence, 3));

        for (i, source) in sources(input.path(), 4).iter().enumerate() {
            writer.append(source, &format!("file{i}.txt"), 1_000).unwrap();
        }
        writer.close();

        let finalized = writer.finalized().to_vec();
        assert_eq!(finalized.len(), 2);
        assert_eq!(entry_names(&finalized[0]).len(), 3);
        assert_eq!(entry_names(&finalized[1]), vec!["file3.txt".to_string()]);
    }

    #[test]
    fn test_sequence_names_have_no_gaps() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::Sequence, 1));

        for source in sources(input.path(), 3) {
            writer.append(&source, "entry", 1_000).unwrap();
        }
        writer.close();

        for n in 1..=3 {
            assert!(output.path().join(format!("dm_{n}.zip")).is_file(), "dm_{n}.zip is missing");
        }
        let leftovers: Vec<_> = fs::read_dir(output.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("diskmanager_tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_creation_name_embeds_min_and_max() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::CreationTimestamp, 10));

        let early = Local.with_ymd_and_hms(2023, 3, 4, 5, 6, 7).single().unwrap().timestamp_millis();
        let middle = Local.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).single().unwrap().timestamp_millis();
        let late = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap().timestamp_millis();

        let files = sources(input.path(), 3);
        writer.append(&files[0], "a", middle).unwrap();
        writer.append(&files[1], "b", late).unwrap();
        writer.append(&files[2], "c", early).unwrap();

        let path = writer.close().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "dm_20230304050607-20240102030405.zip"
        );
    }

    #[test]
    fn test_min_max_reset_per_segment() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::CreationTimestamp, 1));

        let first = Local.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).single().unwrap().timestamp_millis();
        let second = Local.with_ymd_and_hms(2022, 2, 1, 0, 0, 0).single().unwrap().timestamp_millis();
        let files = sources(input.path(), 2);
        writer.append(&files[0], "a", first).unwrap();
        writer.append(&files[1], "b", second).unwrap();
        writer.close();

        let names: Vec<String> = writer
            .finalized()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "dm_20220101000000-20220101000000.zip".to_string(),
                "dm_20220201000000-20220201000000.zip".to_string(),
            ]
        );
    }

    #[test]
    fn test_close_without_archive_is_noop() {
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::Sequence, 5));
        assert!(writer.close().is_none());
        assert!(writer.finalized().is_empty());
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_final_name_is_replaced() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(output.path().join("dm_1.zip"), b"stale").unwrap();

        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::Sequence, 5));
        let files = sources(input.path(), 1);
        writer.append(&files[0], "file0.txt", 1_000).unwrap();
        let path = writer.close().unwrap();

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut contents = String::new();
        archive.by_name("file0.txt").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "payload 0");
    }

    #[test]
    fn test_byte_limit_rolls() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut policy = policy(output.path(), NamingMode::Sequence, 100);
        policy.max_bytes = Some(5);
        let mut writer = ArchiveWriter::new(&policy);

        for source in sources(input.path(), 2) {
            writer.append(&source, "entry", 1_000).unwrap();
        }
        writer.close();
        assert_eq!(writer.finalized().len(), 2);
    }

    #[test]
    fn test_output_dir_switch_finalizes_open_segment() {
        let input = TempDir::new().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(first.path(), NamingMode::Sequence, 100));

        let files = sources(input.path(), 2);
        writer.append(&files[0], "a", 1_000).unwrap();
        writer.set_output_dir(second.path());
        writer.append(&files[1], "b", 1_000).unwrap();
        writer.close();

        assert!(first.path().join("dm_1.zip").is_file());
        assert!(second.path().join("dm_2.zip").is_file());
    }

    #[test]
    fn test_missing_source_leaves_no_segment() {
        let output = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(&policy(output.path(), NamingMode::Sequence, 5));
        assert!(writer.append(Path::new("/no/such/file"), "x", 1_000).is_err());
        assert_eq!(writer.open_entries(), 0);
        assert!(writer.close().is_none());
    }

    #[test]
    fn test_entry_time_before_zip_epoch() {
        assert_eq!(entry_time(0), zip::DateTime::default());
    }
}
