//! Fleet definition file
//!
//! One host per line, `<address> - <identifier>`:
//!
//! ```text
//! # core routers
//! 10.0.0.5 - alpha
//! db01.lan - beta
//! ```

use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path};
use tracing::warn;

pub const SEPARATOR: &str = " - ";

/// Which lines are dropped before splitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentFilter {
    /// Blank lines and lines starting with `#` are ignored.
    #[default]
    Strict,
    /// Every line goes to the splitter, as the first generation of the tool
    /// did. Lines without a separator are still rejected afterwards.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub address: String,
    pub identifier: String,
}

/// Loads `definition_file` in encounter order. Duplicates are kept.
pub fn load_fleet(definition_file: &Path, filter: CommentFilter) -> Result<Vec<FleetEntry>> {
    if !definition_file.exists() {
        let absolute = std::env::current_dir()
            .map(|cwd| cwd.join(definition_file))
            .unwrap_or_else(|_| definition_file.to_path_buf());
        return Err(CollectorError::FatalConfig(absolute));
    }

    let content =
        fs::read_to_string(definition_file).map_err(|e| CollectorError::filesystem(definition_file, e))?;
    Ok(parse_fleet(&content, filter))
}

pub fn parse_fleet(content: &str, filter: CommentFilter) -> Vec<FleetEntry> {
    let mut entries = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if filter == CommentFilter::Strict && (line.trim().is_empty() || line.starts_with('#')) {
            continue;
        }

        let Some((address, identifier)) = line.trim().split_once(SEPARATOR) else {
            warn!("Fleet line {} has no '{}' separator, skipped: {:?}", line_no, SEPARATOR.trim(), line);
            continue;
        };
        let (address, identifier) = (address.trim(), identifier.trim());

        if address.is_empty() {
            warn!("Fleet line {} has an empty address, skipped", line_no);
            continue;
        }
        if !is_valid_identifier(identifier) {
            warn!("Fleet line {} has an unusable identifier {:?}, skipped", line_no, identifier);
            continue;
        }

        entries.push(FleetEntry {
            address: address.to_string(),
            identifier: identifier.to_string(),
        });
    }

    entries
}

/// The identifier becomes a directory name: exactly one normal path component.
fn is_valid_identifier(identifier: &str) -> bool {
    let mut components = Path::new(identifier).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !identifier.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: &str, identifier: &str) -> FleetEntry {
        FleetEntry {
            address: address.to_string(),
            identifier: identifier.to_string(),
        }
    }

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let content = "# routers\n10.0.0.5 - alpha\n\n   \ndb01.lan - beta\n#10.0.0.9 - old\n";
        assert_eq!(
            parse_fleet(content, CommentFilter::Strict),
            vec![entry("10.0.0.5", "alpha"), entry("db01.lan", "beta")]
        );
    }

    #[test]
    fn test_parse_keeps_order_and_duplicates() {
        let content = "10.0.0.7 - gamma\n10.0.0.5 - alpha\n10.0.0.7 - gamma\n";
        assert_eq!(
            parse_fleet(content, CommentFilter::Strict),
            vec![entry("10.0.0.7", "gamma"), entry("10.0.0.5", "alpha"), entry("10.0.0.7", "gamma")]
        );
    }

    #[test]
    fn test_legacy_filter_lets_comment_lines_through() {
        let content = "#10.0.0.9 - old\n10.0.0.5 - alpha\n# plain note\n";
        assert_eq!(
            parse_fleet(content, CommentFilter::Legacy),
            vec![entry("#10.0.0.9", "old"), entry("10.0.0.5", "alpha")]
        );
        assert_eq!(parse_fleet(content, CommentFilter::Strict), vec![entry("10.0.0.5", "alpha")]);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let content = "10.0.0.5-alpha\n10.0.0.6 - ../etc\n10.0.0.7 - a/b\n - nameless\n10.0.0.8 - delta\r\n";
        assert_eq!(parse_fleet(content, CommentFilter::Strict), vec![entry("10.0.0.8", "delta")]);
    }

    #[test]
    fn test_missing_file_is_fatal_with_absolute_path() {
        let err = load_fleet(Path::new("data/definitely-missing-IPs"), CommentFilter::Strict).unwrap_err();
        match err {
            CollectorError::FatalConfig(path) => {
                assert!(path.is_absolute());
                assert!(path.ends_with("data/definitely-missing-IPs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("IPs");
        fs::write(&file, "10.0.0.5 - alpha\n").unwrap();
        assert_eq!(load_fleet(&file, CommentFilter::Strict).unwrap(), vec![entry("10.0.0.5", "alpha")]);
    }
}
