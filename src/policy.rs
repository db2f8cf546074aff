//! Retention and archive policies
//!
//! Policies are immutable value objects built from the `[dir]` properties.
//! All validation happens here so a bad configuration fails before any file
//! is touched.

use crate::config::{PolicyConfig, Properties, StaticProperties, parse_age_component};
use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Upper bound of entries written into one archive segment
pub const MAX_FILES_PER_ZIP: usize = 60_000;

/// Static property consulted when `maxFilesToArchive` is not set in `[dir]`
pub const MAX_FILES_STATIC_KEY: &str = "diskManager.maxFilesToArchive";

pub const DEFAULT_OUTPUT_FORMAT: &str = "%Y%d%m%I%M%S";

const MILLIS_PER_MINUTE: u64 = 60_000;
const MILLIS_PER_HOUR: u64 = 3_600_000;

/// What happens to eligible files (`archiveMode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// 0: move files into the output directory
    Move,
    /// 1: zip archives named `prefix<sequence>.zip`
    ZipSequence,
    /// 2: zip archives named by the finalize time
    ZipMinMax,
    /// 3: zip archives named by the oldest and youngest entry
    ZipCreationTime,
    /// 4: delete files
    Delete,
}

impl ArchiveMode {
    pub fn from_code(code: &str) -> Result<Self> {
        let parsed: i64 = code
            .trim()
            .parse()
            .with_context(|| format!("Parameter archiveMode is not a number [{code}]"))?;
        Ok(match parsed {
            0 => ArchiveMode::Move,
            1 => ArchiveMode::ZipSequence,
            2 => ArchiveMode::ZipMinMax,
            3 => ArchiveMode::ZipCreationTime,
            4 => ArchiveMode::Delete,
            other => anyhow::bail!("Unknown archive mode {other}"),
        })
    }

    /// Archive naming for the zip modes
    pub fn naming(self) -> Option<NamingMode> {
        match self {
            ArchiveMode::ZipSequence => Some(NamingMode::Sequence),
            ArchiveMode::ZipMinMax => Some(NamingMode::MinMaxTimestamp),
            ArchiveMode::ZipCreationTime => Some(NamingMode::CreationTimestamp),
            ArchiveMode::Move | ArchiveMode::Delete => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveMode::Move => "move",
            ArchiveMode::ZipSequence => "zip-sequence",
            ArchiveMode::ZipMinMax => "zip-minmax",
            ArchiveMode::ZipCreationTime => "zip-creation-time",
            ArchiveMode::Delete => "delete",
        }
    }
}

/// Final file name policy of an archive segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingMode {
    /// `prefix + sequenceNumber + ".zip"`
    Sequence,
    /// `prefix + now + ".zip"`
    MinMaxTimestamp,
    /// `prefix + min + "-" + max + ".zip"`
    CreationTimestamp,
}

/// Where the timestamp of a file comes from
#[derive(Debug, Clone)]
pub enum AgeSource {
    FilesystemModTime,
    FilenameTimestamp {
        /// First capture group holds the timestamp text
        pattern: Regex,
        /// strftime format of the captured text
        date_format: String,
    },
}

/// Age policy shared by every disposition
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub age_threshold_millis: u64,
    pub age_source: AgeSource,
    file_name_mask: Regex,
}

impl RetentionPolicy {
    pub fn new(age_threshold_millis: u64, age_source: AgeSource, file_mask: &str) -> Result<Self> {
        Ok(Self {
            age_threshold_millis,
            age_source,
            file_name_mask: compile_full_match(file_mask)
                .with_context(|| format!("FileMask parameter \"{file_mask}\" is invalid"))?,
        })
    }

    /// Build from `fileAge*`, `fileAgeMode`, `timeMask`, `dateFormatInput`, `fileMask`
    pub fn from_properties(props: &Properties, statics: &StaticProperties) -> Result<Self> {
        let hours = parse_age_component(props.get("fileAgeHour"), "fileAgeHour", statics)?;
        let days = parse_age_component(props.get("fileAgeDay"), "fileAgeDay", statics)?;
        let minutes = parse_age_component(props.get("fileAgeMinutes"), "fileAgeMinutes", statics)?;

        let age_threshold_millis = days
            .checked_mul(24)
            .and_then(|h| h.checked_add(hours))
            .and_then(|h| h.checked_mul(MILLIS_PER_HOUR))
            .and_then(|h| h.checked_add(minutes.checked_mul(MILLIS_PER_MINUTE)?))
            .context("File age is too large")?;

        let age_source = match props.get_or("fileAgeMode", "0") {
            "0" => AgeSource::FilesystemModTime,
            "1" => {
                let time_mask = props
                    .get("timeMask")
                    .context("Parameter timeMask must be defined")?;
                let pattern = Regex::new(time_mask)
                    .with_context(|| format!("TimeMask parameter \"{time_mask}\" is invalid"))?;
                let date_format = props
                    .get("dateFormatInput")
                    .context("Parameter dateFormatInput must be defined")?;
                validate_date_format(date_format)
                    .with_context(|| format!("Dateformat parameter \"{date_format}\" is invalid"))?;
                AgeSource::FilenameTimestamp {
                    pattern,
                    date_format: date_format.to_string(),
                }
            }
            other => anyhow::bail!("Unknown file age mode {other}"),
        };

        let file_mask = props.require("fileMask")?;
        Self::new(age_threshold_millis, age_source, file_mask)
    }

    /// Whether the whole file name matches `fileMask`
    pub fn matches_mask(&self, file_name: &str) -> bool {
        self.file_name_mask.is_match(file_name)
    }
}

/// Output side of the zip dispositions
#[derive(Debug, Clone)]
pub struct ArchivePolicy {
    pub out_dir: PathBuf,
    pub source_dir: PathBuf,
    pub prefix: String,
    pub naming: NamingMode,
    pub output_format: String,
    pub max_entries: usize,
    pub max_bytes: Option<u64>,
}

impl ArchivePolicy {
    pub fn from_properties(props: &Properties, statics: &StaticProperties, naming: NamingMode) -> Result<Self> {
        let out_dir = props.require_path("outDir")?;
        ensure_writable_dir(&out_dir, "Target")?;

        let source_dir = props.require_path("inDir")?;
        ensure_writable_dir(&source_dir, "Source")?;

        let prefix = props
            .get("archivePrefix")
            .context("Parameter archivePrefix is invalid")?
            .to_string();

        let output_format = props.get_or("dateFormatOutput", DEFAULT_OUTPUT_FORMAT).to_string();
        validate_date_format(&output_format)
            .with_context(|| format!("Parameter dateFormatOutput is invalid [{output_format}]"))?;

        let requested = props
            .get("maxFilesToArchive")
            .or_else(|| statics.get(MAX_FILES_STATIC_KEY));
        let max_entries = clamp_max_entries(requested);

        let max_bytes = match props.get("maxBytesPerArchive") {
            Some(raw) => {
                let bytes: u64 = raw
                    .parse()
                    .with_context(|| format!("Parameter maxBytesPerArchive is not a number [{raw}]"))?;
                (bytes > 0).then_some(bytes)
            }
            None => None,
        };

        Ok(Self {
            out_dir,
            source_dir,
            prefix,
            naming,
            output_format,
            max_entries,
            max_bytes,
        })
    }
}

/// Clamp `maxFilesToArchive` into `(0, 60000]`, anything unusable becomes 60000
pub fn clamp_max_entries(requested: Option<&str>) -> usize {
    match requested.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(n) if n >= 1 && n <= MAX_FILES_PER_ZIP as i64 => n as usize,
        _ => MAX_FILES_PER_ZIP,
    }
}

/// Named exceptions to the generic dispositions
#[derive(Debug, Clone, Default)]
pub struct DispositionRules {
    exempt_names: BTreeSet<String>,
    copy_before_archive: BTreeSet<String>,
    failed_suffixes: Vec<String>,
}

impl DispositionRules {
    pub fn new<I, J, K>(exempt_names: I, copy_before_archive: J, failed_suffixes: K) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            exempt_names: exempt_names.into_iter().map(Into::into).collect(),
            copy_before_archive: copy_before_archive
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
            failed_suffixes: failed_suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config.exempt_names.iter().cloned(),
            config.copy_before_archive.iter(),
            config.failed_suffixes.iter().cloned(),
        )
    }

    /// Never deleted regardless of age
    pub fn is_exempt(&self, file_name: &str) -> bool {
        self.exempt_names.contains(file_name)
    }

    /// Archived through a timestamped copy so the live file stays intact
    pub fn copies_before_archive(&self, file_name: &str) -> bool {
        self.copy_before_archive.contains(&file_name.to_lowercase())
    }

    /// Candidate for deletion inside a failed directory
    pub fn is_failed_candidate(&self, file_name: &str) -> bool {
        self.failed_suffixes.is_empty() || self.failed_suffixes.iter().any(|s| file_name.ends_with(s.as_str()))
    }
}

/// Reject strftime formats chrono cannot render or parse
pub fn validate_date_format(format: &str) -> Result<()> {
    if format.is_empty() {
        anyhow::bail!("Date format is empty");
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("Date format \"{format}\" contains an invalid specifier");
    }
    Ok(())
}

/// Output directories are checked when the filter is built, not at first use
pub fn ensure_writable_dir(dir: &Path, role: &str) -> Result<()> {
    let metadata = std::fs::metadata(dir)
        .with_context(|| format!("{role} directory \"{}\" does not exist or is not a directory.", dir.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("{role} directory \"{}\" does not exist or is not a directory.", dir.display());
    }
    if metadata.permissions().readonly() {
        anyhow::bail!("Cannot write to {} directory \"{}\"", role.to_lowercase(), dir.display());
    }
    Ok(())
}

fn compile_full_match(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}
