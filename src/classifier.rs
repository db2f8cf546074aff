//! File age classification
//!
//! The classifier decides whether a file is old enough to act on. It reads
//! the file name and, for filesystem ages, the file metadata; it never
//! changes anything on disk.

use crate::policy::{AgeSource, RetentionPolicy};
use anyhow::{Context, Result};
use chrono::format::{Fixed, Item, Numeric, StrftimeItems};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp reported for files without a real modification time
pub const NO_MODIFICATION_TIME: i64 = 1;

/// Year a parsed timestamp carries when its format has no year field.
/// A leap year, so February 29 parses.
const YEARLESS: i32 = 1972;

/// Outcome of classifying one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub eligible: bool,
    /// Milliseconds since the epoch, [`NO_MODIFICATION_TIME`] for dangling links
    pub effective_timestamp_millis: i64,
}

impl Classification {
    pub const fn not_eligible() -> Self {
        Self {
            eligible: false,
            effective_timestamp_millis: -1,
        }
    }

    pub const fn eligible_at(effective_timestamp_millis: i64) -> Self {
        Self {
            eligible: true,
            effective_timestamp_millis,
        }
    }
}

/// Age classifier bound to one policy and one run start time
#[derive(Debug, Clone)]
pub struct AgeClassifier {
    policy: RetentionPolicy,
    run_start: DateTime<Local>,
}

impl AgeClassifier {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self::with_run_start(policy, Local::now())
    }

    /// Classifier with a fixed run start, so archive names and ages are
    /// computed against the same instant for the whole run
    pub fn with_run_start(policy: RetentionPolicy, run_start: DateTime<Local>) -> Self {
        Self { policy, run_start }
    }

    pub fn run_start_millis(&self) -> i64 {
        self.run_start.timestamp_millis()
    }

    /// Classify a file by name mask and age
    pub fn classify(&self, path: &Path) -> Result<Classification> {
        let name = file_name(path);

        if !self.policy.matches_mask(&name) {
            return Ok(Classification::not_eligible());
        }

        let timestamp = match &self.policy.age_source {
            AgeSource::FilesystemModTime => modified_millis(path)?,
            AgeSource::FilenameTimestamp { pattern, date_format } => {
                self.timestamp_from_name(&name, pattern, date_format)?
            }
        };

        Ok(self.judge(timestamp))
    }

    /// Apply the age threshold to an already known timestamp
    pub fn judge(&self, timestamp_millis: i64) -> Classification {
        if timestamp_millis == 0 {
            return Classification::eligible_at(NO_MODIFICATION_TIME);
        }

        let threshold = i64::try_from(self.policy.age_threshold_millis).unwrap_or(i64::MAX);
        if self.run_start_millis().saturating_sub(timestamp_millis) > threshold {
            Classification::eligible_at(timestamp_millis)
        } else {
            Classification::not_eligible()
        }
    }

    /// Extract the timestamp carried in a file name.
    ///
    /// Dates parsed with a format that has no year are moved into the run's
    /// year, or the year before when that would put them in the future.
    /// February 29 becomes March 1 in a year without it.
    pub fn timestamp_from_name(&self, name: &str, pattern: &Regex, date_format: &str) -> Result<i64> {
        let captured = pattern
            .captures(name)
            .with_context(|| format!("File name {name} does not match timeMask {pattern}"))?
            .get(1)
            .with_context(|| format!("timeMask {pattern} has no capture group for {name}"))?
            .as_str();

        let mut parsed = parse_partial_datetime(captured, date_format)
            .with_context(|| format!("Cannot parse \"{captured}\" of {name} with format \"{date_format}\""))?;

        if !format_has_year(date_format) {
            let yearless = parsed;
            let current_year = self.run_start.year();
            parsed = in_year(&yearless, current_year)?;

            if local_millis(&parsed)? > self.run_start_millis() {
                parsed = in_year(&yearless, current_year - 1)?;
            }
        }

        local_millis(&parsed)
    }
}

/// Last modification time in milliseconds, 0 when the target does not exist
pub fn modified_millis(path: &Path) -> Result<i64> {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .with_context(|| format!("No modification time for {}", path.display()))?;
            Ok(system_time_millis(modified))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("Failed to read metadata of {}", path.display())),
    }
}

pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn in_year(datetime: &NaiveDateTime, year: i32) -> Result<NaiveDateTime> {
    datetime
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1).map(|date| date.and_time(datetime.time())))
        .with_context(|| format!("{datetime} has no equivalent in {year}"))
}

fn local_millis(datetime: &NaiveDateTime) -> Result<i64> {
    Local
        .from_local_datetime(datetime)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .with_context(|| format!("{datetime} does not exist in the local time zone"))
}

/// Parse `text` with a strftime `format` that may omit fields.
///
/// Missing fields default to January, the first day and midnight. A missing
/// year defaults to the leap year 1972.
pub fn parse_partial_datetime(text: &str, format: &str) -> Result<NaiveDateTime> {
    let (defaults_format, defaults_text) = missing_field_defaults(format);
    let full_format = format!("{defaults_format}{format}");
    let full_text = format!("{defaults_text}{text}");

    NaiveDateTime::parse_from_str(&full_text, &full_format)
        .with_context(|| format!("\"{text}\" does not match \"{format}\""))
}

fn format_has_year(format: &str) -> bool {
    !missing_field_defaults(format).0.starts_with("%Y")
}

fn missing_field_defaults(format: &str) -> (String, String) {
    let mut year = false;
    let mut month = false;
    let mut day = false;
    let mut hour = false;
    let mut hour12 = false;
    let mut am_pm = false;
    let mut minute = false;
    let mut second = false;

    for item in StrftimeItems::new(format) {
        match item {
            Item::Numeric(numeric, _) => match numeric {
                Numeric::Year
                | Numeric::YearDiv100
                | Numeric::YearMod100
                | Numeric::IsoYear
                | Numeric::IsoYearDiv100
                | Numeric::IsoYearMod100 => year = true,
                Numeric::Month => month = true,
                Numeric::Day => day = true,
                Numeric::Ordinal => {
                    month = true;
                    day = true;
                }
                Numeric::Hour => hour = true,
                Numeric::Hour12 => hour12 = true,
                Numeric::Minute => minute = true,
                Numeric::Second => second = true,
                Numeric::Timestamp => return (String::new(), String::new()),
                _ => {}
            },
            Item::Fixed(fixed) => match fixed {
                Fixed::ShortMonthName | Fixed::LongMonthName => month = true,
                Fixed::LowerAmPm | Fixed::UpperAmPm => am_pm = true,
                Fixed::RFC2822 | Fixed::RFC3339 => return (String::new(), String::new()),
                _ => {}
            },
            _ => {}
        }
    }

    let mut defaults_format = String::new();
    let mut defaults_text = String::new();
    let mut push = |spec: &str, value: &str| {
        defaults_format.push_str(spec);
        defaults_format.push(' ');
        defaults_text.push_str(value);
        defaults_text.push(' ');
    };

    if !year {
        push("%Y", &YEARLESS.to_string());
    }
    if !month {
        push("%m", "01");
    }
    if !day {
        push("%d", "01");
    }
    if !hour && !hour12 {
        push("%H", "00");
    }
    if hour12 && !am_pm {
        push("%p", "AM");
    }
    if !minute {
        push("%M", "00");
    }
    if !second {
        push("%S", "00");
    }

    (defaults_format, defaults_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY_MS: u64 = 86_400_000;

    fn fs_policy(days: u64, mask: &str) -> RetentionPolicy {
        RetentionPolicy::new(days * DAY_MS, AgeSource::FilesystemModTime, mask).unwrap()
    }

    fn name_policy(time_mask: &str, format: &str) -> RetentionPolicy {
        RetentionPolicy::new(
            0,
            AgeSource::FilenameTimestamp {
                pattern: Regex::new(time_mask).unwrap(),
                date_format: format.to_string(),
            },
            ".*",
        )
        .unwrap()
    }

    fn touch_days_ago(path: &Path, days: u64) {
        fs::write(path, b"data").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(days * 86_400))
            .unwrap();
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
    }

    #[test]
    fn test_mask_mismatch_is_never_eligible() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("ancient.log");
        touch_days_ago(&old, 400);

        let classifier = AgeClassifier::new(fs_policy(0, r".*\.xml"));
        assert_eq!(classifier.classify(&old).unwrap(), Classification::not_eligible());
    }

    #[test]
    fn test_filesystem_age() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("A1.xml");
        touch_days_ago(&file, 10);

        let young_enough = AgeClassifier::new(fs_policy(20, ".*")).classify(&file).unwrap();
        assert!(!young_enough.eligible);

        let old_enough = AgeClassifier::new(fs_policy(5, ".*")).classify(&file).unwrap();
        assert!(old_enough.eligible);
        assert_eq!(
            old_enough.effective_timestamp_millis,
            modified_millis(&file).unwrap()
        );
    }

    #[test]
    fn test_threshold_boundary_is_strict() {
        let start = local(2024, 6, 1, 12, 0);
        let classifier = AgeClassifier::with_run_start(fs_policy(1, ".*"), start);
        let start_ms = start.timestamp_millis();

        assert!(!classifier.judge(start_ms - DAY_MS as i64).eligible);
        assert!(classifier.judge(start_ms - DAY_MS as i64 - 1).eligible);
        assert!(!classifier.judge(start_ms + 5_000).eligible);
    }

    #[test]
    fn test_zero_modification_time_is_always_eligible() {
        let classifier = AgeClassifier::new(fs_policy(100_000, ".*"));
        assert_eq!(
            classifier.judge(0),
            Classification::eligible_at(NO_MODIFICATION_TIME)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_uses_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("dangling.xml");
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), &link).unwrap();

        let classification = AgeClassifier::new(fs_policy(365, ".*")).classify(&link).unwrap();
        assert_eq!(classification, Classification::eligible_at(NO_MODIFICATION_TIME));
    }

    #[test]
    fn test_filename_timestamp_with_year() {
        let classifier = AgeClassifier::with_run_start(
            name_policy(r"_(\d{12})\.", "%Y%m%d%H%M"),
            local(2024, 6, 1, 12, 0),
        );
        let ts = classifier
            .timestamp_from_name(
                "A_202401311530.xml",
                &Regex::new(r"_(\d{12})\.").unwrap(),
                "%Y%m%d%H%M",
            )
            .unwrap();
        assert_eq!(ts, local(2024, 1, 31, 15, 30).timestamp_millis());

        let classification = classifier.classify(Path::new("/nowhere/A_202401311530.xml")).unwrap();
        assert_eq!(classification, Classification::eligible_at(ts));
    }

    #[test]
    fn test_yearless_timestamp_uses_current_year() {
        let classifier = AgeClassifier::with_run_start(
            name_policy(r"^A(\d{8})", "%m%d%H%M"),
            local(2024, 3, 15, 12, 0),
        );

        let past = classifier.classify(Path::new("/x/A03101200.xml")).unwrap();
        assert_eq!(past.effective_timestamp_millis, local(2024, 3, 10, 12, 0).timestamp_millis());

        let future = classifier.classify(Path::new("/x/A12241200.xml")).unwrap();
        assert_eq!(future.effective_timestamp_millis, local(2023, 12, 24, 12, 0).timestamp_millis());
    }

    #[test]
    fn test_yearless_leap_day() {
        let policy = || name_policy(r"^A(\d{8})", "%m%d%H%M");

        let leap_year = AgeClassifier::with_run_start(policy(), local(2024, 3, 15, 12, 0));
        let parsed = leap_year.classify(Path::new("/x/A02291200.xml")).unwrap();
        assert_eq!(parsed.effective_timestamp_millis, local(2024, 2, 29, 12, 0).timestamp_millis());

        let common_year = AgeClassifier::with_run_start(policy(), local(2025, 3, 15, 12, 0));
        let parsed = common_year.classify(Path::new("/x/A02291200.xml")).unwrap();
        assert_eq!(parsed.effective_timestamp_millis, local(2025, 3, 1, 12, 0).timestamp_millis());

        let before_march = AgeClassifier::with_run_start(policy(), local(2025, 2, 10, 12, 0));
        let parsed = before_march.classify(Path::new("/x/A02291200.xml")).unwrap();
        assert_eq!(parsed.effective_timestamp_millis, local(2024, 2, 29, 12, 0).timestamp_millis());
    }

    #[test]
    fn test_explicit_1970_is_not_moved() {
        let classifier = AgeClassifier::with_run_start(
            name_policy(r"_(\d{8})", "%Y%m%d"),
            local(2024, 3, 15, 12, 0),
        );
        let parsed = classifier.classify(Path::new("/x/A_19700105.xml")).unwrap();
        assert_eq!(parsed.effective_timestamp_millis, local(1970, 1, 5, 0, 0).timestamp_millis());
    }

    #[test]
    fn test_unparseable_filename_is_an_error() {
        let classifier = AgeClassifier::new(name_policy(r"_(\d{8})", "%Y%m%d"));
        assert!(classifier.classify(Path::new("/x/no_digits_here.xml")).is_err());
        assert!(classifier.classify(Path::new("/x/A_20241399.xml")).is_err());
    }

    #[test]
    fn test_partial_formats() {
        let date_only = parse_partial_datetime("20240131", "%Y%m%d").unwrap();
        assert_eq!(date_only.to_string(), "2024-01-31 00:00:00");

        let no_year = parse_partial_datetime("0131-0915", "%m%d-%H%M").unwrap();
        assert_eq!(no_year.to_string(), "1972-01-31 09:15:00");

        let leap_day = parse_partial_datetime("0229", "%m%d").unwrap();
        assert_eq!(leap_day.to_string(), "1972-02-29 00:00:00");

        let month_name = parse_partial_datetime("05Feb2023", "%d%b%Y").unwrap();
        assert_eq!(month_name.to_string(), "2023-02-05 00:00:00");
    }
}
