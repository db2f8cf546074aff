use crate::policy::NamingMode;
use chrono::{DateTime, Local, TimeZone};

/// Final name of a finished archive segment
pub fn final_name(
    prefix: &str,
    naming: NamingMode,
    output_format: &str,
    sequence_number: u32,
    min_timestamp: i64,
    max_timestamp: i64,
    now: DateTime<Local>,
) -> String {
    match naming {
        NamingMode::Sequence => format!("{prefix}{sequence_number}.zip"),
        NamingMode::MinMaxTimestamp => format!("{prefix}{}.zip", now.format(output_format)),
        NamingMode::CreationTimestamp => format!(
            "{prefix}{}-{}.zip",
            format_millis(min_timestamp, output_format),
            format_millis(max_timestamp, output_format)
        ),
    }
}

/// Name of the segment while it is still being written
pub fn temp_name(output_format: &str, sequence_number: u32, now: DateTime<Local>) -> String {
    format!("diskmanager_tmp_{}_{sequence_number}.zip", now.format(output_format))
}

pub fn format_millis(millis: i64, output_format: &str) -> String {
    match Local.timestamp_millis_opt(millis).earliest() {
        Some(datetime) => datetime.format(output_format).to_string(),
        None => millis.to_string(),
    }
}
