//! Legacy extraction into the process working directory.
//!
//! Kept in its own test binary: it changes the current directory.

use chrono::NaiveDate;
use logvault_collector::archive::{ArchiveEngine, ExtractTarget};
use logvault_collector::{marker, HostOutcome};
use logvault_devkit::TestHarness;
use std::fs;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_working_directory_extraction_leaves_storage_host_at_epoch() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.8 - delta"]).unwrap();
    let dir = harness.seed_marker("delta", date(2024, 2, 3)).unwrap();
    harness.seed_file("delta", "apt/history.log", b"install curl").unwrap();
    ArchiveEngine::compress(&dir, date(2024, 2, 3)).unwrap();
    fs::remove_dir_all(dir.join("apt")).unwrap();
    fs::remove_file(marker::marker_path(&dir)).unwrap();

    let cwd = tempfile::tempdir().unwrap();
    std::env::set_current_dir(cwd.path()).unwrap();
    let mut config = harness.config();
    config.archive.extract_into = ExtractTarget::WorkingDirectory;

    let summary = harness.collector().run(&config, date(2024, 3, 1)).await.unwrap();

    // the archive lands beside the process, not in the storage root
    let extracted = cwd.path().join("delta");
    assert_eq!(
        fs::read_to_string(extracted.join("apt").join("history.log")).unwrap(),
        "install curl"
    );
    assert_eq!(fs::read_to_string(marker::marker_path(&extracted)).unwrap(), "2024-02-03");

    assert_eq!(harness.marker_text("delta").unwrap(), "1970-01-01");
    assert_eq!(harness.entries("delta").unwrap(), vec!["2024_02.tgz", "last_update"]);
    assert_eq!(summary.hosts[0].outcome, HostOutcome::Unreachable);
}
