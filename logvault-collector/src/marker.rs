//! Marker file holding a host's last successful collection date
//!
//! The file is named `last_update` and contains one `YYYY-MM-DD` line.

use crate::error::{CollectorError, Result};
use chrono::NaiveDate;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const MARKER_FILE: &str = "last_update";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date written for hosts that were never collected.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub fn marker_path(directory: &Path) -> PathBuf {
    directory.join(MARKER_FILE)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Strict `YYYY-MM-DD` parser. Surrounding whitespace is ignored, anything
/// else that is not exactly four, two and two digits is rejected.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let value = raw.trim();
    let parse_error = |reason: &str| CollectorError::Parse {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let bytes = value.as_bytes();
    if bytes.len() != 10 {
        return Err(parse_error("expected exactly 10 characters (YYYY-MM-DD)"));
    }
    if bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(parse_error("expected '-' separators at positions 5 and 8"));
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 4 && *i != 7)
        .all(|(_, b)| b.is_ascii_digit());
    if !digits_ok {
        return Err(parse_error("year, month and day must be digits"));
    }

    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| parse_error(&e.to_string()))
}

/// Reads the marker of `directory`. `Ok(None)` when the file does not exist.
pub fn read_marker(directory: &Path) -> Result<Option<NaiveDate>> {
    let path = marker_path(directory);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let first_line = content.lines().next().unwrap_or_default();
            parse_date(first_line).map(Some)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CollectorError::filesystem(path, e)),
    }
}

/// Overwrites the marker of `directory` with `date`.
pub fn write_marker(directory: &Path, date: NaiveDate) -> Result<()> {
    let path = marker_path(directory);
    if !directory.is_dir() {
        return Err(CollectorError::Persistence {
            path,
            source: std::io::Error::new(ErrorKind::NotFound, "host directory is missing"),
        });
    }
    fs::write(&path, format_date(date)).map_err(|source| CollectorError::Persistence { path, source })
}
