//! End-to-end collection passes against the mock transport and probe.

use chrono::NaiveDate;
use logvault_collector::archive::ArchiveEngine;
use logvault_collector::credentials::EnvCredentials;
use logvault_collector::orchestrator::Stage;
use logvault_collector::{marker, Collector, CollectorError, HostOutcome};
use logvault_devkit::{FailureMode, TestHarness};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    date(2024, 6, 18)
}

#[tokio::test]
async fn test_mixed_fleet_pass() {
    let harness = TestHarness::new().unwrap();
    harness
        .write_fleet(&["10.0.0.5 - alpha", "10.0.0.6 - beta", "10.0.0.7 - gamma"])
        .unwrap();
    harness.seed_marker("beta", date(2024, 6, 8)).unwrap();
    harness.seed_marker("gamma", date(2024, 1, 1)).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.probe.set_reachable("10.0.0.6");

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();

    // alpha: new and reachable, fetched and sealed
    assert_eq!(harness.entries("alpha").unwrap(), vec!["2024_06.tgz", "last_update"]);
    assert_eq!(harness.marker_text("alpha").unwrap(), "2024-06-18");
    let members = harness.archive_members("alpha", "2024_06.tgz").unwrap();
    assert!(members.contains(&"alpha/syslog".to_string()));
    assert!(members.contains(&"alpha/apt/history.log".to_string()));

    // beta: fresh, no fetch
    assert_eq!(harness.marker_text("beta").unwrap(), "2024-06-08");
    assert_eq!(harness.entries("beta").unwrap(), vec!["last_update"]);

    // gamma: stale but unreachable
    assert_eq!(harness.marker_text("gamma").unwrap(), "2024-01-01");
    assert_eq!(harness.entries("gamma").unwrap(), vec!["last_update"]);

    assert_eq!(harness.transport.get_fetched_addresses(), vec!["10.0.0.5"]);
    assert_eq!(harness.probe.get_probed(), vec!["10.0.0.5", "10.0.0.7"]);

    let identifiers: Vec<_> = summary.hosts.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["alpha", "beta", "gamma"]);
    assert!(matches!(
        summary.report("alpha").unwrap().outcome,
        HostOutcome::Collected { files: 4, directories: 2, skipped: 0, .. }
    ));
    assert_eq!(summary.report("beta").unwrap().outcome, HostOutcome::Fresh { purged: 0 });
    assert_eq!(summary.report("gamma").unwrap().outcome, HostOutcome::Unreachable);

    let counts = summary.counts();
    assert_eq!((counts.collected, counts.fresh, counts.unreachable), (1, 1, 1));
}

#[tokio::test]
async fn test_fresh_host_purges_stray_files_only() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.6 - beta"]).unwrap();
    harness.seed_marker("beta", date(2024, 6, 8)).unwrap();
    harness.seed_file("beta", "2024_03.tgz", b"sealed earlier").unwrap();
    harness.seed_file("beta", "syslog", b"left by an interrupted run").unwrap();
    harness.seed_file("beta", "nginx/access.log", b"GET /").unwrap();
    harness.probe.set_reachable("10.0.0.6");

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();

    assert_eq!(summary.hosts[0].outcome, HostOutcome::Fresh { purged: 2 });
    assert_eq!(harness.entries("beta").unwrap(), vec!["2024_03.tgz", "last_update"]);
    assert_eq!(harness.read_marker("beta").unwrap(), Some(date(2024, 6, 8)));
    assert!(harness.transport.get_calls().is_empty());
    assert!(harness.probe.get_probed().is_empty());
}

#[tokio::test]
async fn test_staleness_window_boundary() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha", "10.0.0.6 - beta"]).unwrap();
    // exactly 90 days before, and 91 days before
    harness.seed_marker("alpha", date(2024, 3, 20)).unwrap();
    harness.seed_marker("beta", date(2024, 3, 19)).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.probe.set_reachable("10.0.0.6");

    harness.collector().run(&harness.config(), today()).await.unwrap();

    assert_eq!(harness.transport.get_fetched_addresses(), vec!["10.0.0.6"]);
    assert_eq!(harness.marker_text("alpha").unwrap(), "2024-03-20");
    assert_eq!(harness.marker_text("beta").unwrap(), "2024-06-18");
}

#[tokio::test]
async fn test_failed_fetch_keeps_marker() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.transport.fail_host("10.0.0.5", FailureMode::Authentication);

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();

    match &summary.hosts[0].outcome {
        HostOutcome::FetchFailed { error_kind, .. } => assert_eq!(error_kind, "authentication"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(harness.marker_text("alpha").unwrap(), "1970-01-01");
    assert_eq!(harness.entries("alpha").unwrap(), vec!["last_update"]);
}

#[tokio::test]
async fn test_interrupted_fetch_is_retried_next_run() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.transport.fail_host("10.0.0.5", FailureMode::Interrupted);
    let collector = harness.collector();

    let first = collector.run(&harness.config(), today()).await.unwrap();
    assert!(matches!(first.hosts[0].outcome, HostOutcome::FetchFailed { .. }));
    assert_eq!(harness.read_marker("alpha").unwrap(), Some(marker::epoch()));
    assert_eq!(harness.entries("alpha").unwrap(), vec!["last_update", "syslog"]);

    harness.transport.recover_host("10.0.0.5");
    let second = collector.run(&harness.config(), date(2024, 6, 19)).await.unwrap();

    assert!(matches!(second.hosts[0].outcome, HostOutcome::Collected { .. }));
    assert_eq!(harness.entries("alpha").unwrap(), vec!["2024_06.tgz", "last_update"]);
    assert_eq!(harness.marker_text("alpha").unwrap(), "2024-06-19");
}

#[tokio::test]
async fn test_second_run_same_day_is_fresh() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    let collector = harness.collector();

    collector.run(&harness.config(), today()).await.unwrap();
    let sealed = harness.entries("alpha").unwrap();
    let second = collector.run(&harness.config(), today()).await.unwrap();

    assert_eq!(second.hosts[0].outcome, HostOutcome::Fresh { purged: 0 });
    assert_eq!(harness.entries("alpha").unwrap(), sealed);
    assert_eq!(harness.transport.get_calls().len(), 1);
}

#[tokio::test]
async fn test_legacy_archive_restores_marker() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.8 - delta"]).unwrap();
    let dir = harness.seed_marker("delta", date(2024, 2, 3)).unwrap();
    harness.seed_file("delta", "apt/history.log", b"install curl").unwrap();
    ArchiveEngine::compress(&dir, date(2024, 2, 3)).unwrap();
    fs::remove_dir_all(dir.join("apt")).unwrap();
    fs::remove_file(marker::marker_path(&dir)).unwrap();
    harness.probe.set_reachable("10.0.0.8");

    let summary = harness.collector().run(&harness.config(), date(2024, 3, 1)).await.unwrap();

    assert_eq!(harness.read_marker("delta").unwrap(), Some(date(2024, 2, 3)));
    // restored loose files belong to a fresh host and are purged
    assert_eq!(summary.hosts[0].outcome, HostOutcome::Fresh { purged: 1 });
    assert_eq!(harness.entries("delta").unwrap(), vec!["2024_02.tgz", "last_update"]);
    assert!(harness.transport.get_calls().is_empty());
}

#[tokio::test]
async fn test_malformed_marker_skips_host() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.6 - beta", "10.0.0.5 - alpha"]).unwrap();
    fs::create_dir_all(harness.host_dir("beta")).unwrap();
    harness.seed_file("beta", "last_update", b"last tuesday").unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.probe.set_reachable("10.0.0.6");

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();

    match &summary.hosts[0].outcome {
        HostOutcome::Failed { stage, error_kind, .. } => {
            assert_eq!(*stage, Stage::Reconcile);
            assert_eq!(error_kind, "parse");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(summary.hosts[0].identifier, "beta");
    assert!(matches!(summary.hosts[1].outcome, HostOutcome::Collected { .. }));
    assert_eq!(harness.marker_text("beta").unwrap(), "last tuesday");
    assert_eq!(harness.transport.get_fetched_addresses(), vec!["10.0.0.5"]);
}

#[tokio::test]
async fn test_bootstrap_writes_single_epoch_marker() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.7 - gamma"]).unwrap();

    harness.collector().run(&harness.config(), today()).await.unwrap();

    assert_eq!(harness.entries("gamma").unwrap(), vec!["last_update"]);
    assert_eq!(harness.marker_text("gamma").unwrap(), "1970-01-01");
}

#[tokio::test]
async fn test_missing_fleet_file_is_fatal() {
    let harness = TestHarness::new().unwrap();

    let err = harness.collector().run(&harness.config(), today()).await.unwrap_err();

    match err.downcast_ref::<CollectorError>() {
        Some(CollectorError::FatalConfig(path)) => {
            assert!(path.is_absolute());
            assert!(path.ends_with("data/IPs"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(harness.transport.get_calls().is_empty());
}

#[tokio::test]
async fn test_comment_and_malformed_lines() {
    let harness = TestHarness::new().unwrap();
    harness
        .write_fleet(&["# retired", "#10.0.0.9 - old", "", "10.0.0.5-alpha", "10.0.0.5 - alpha"])
        .unwrap();
    harness.probe.set_reachable("10.0.0.5");

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();
    assert_eq!(summary.hosts.len(), 1);
    assert!(!harness.host_dir("old").exists());

    let mut legacy = harness.config();
    legacy.fleet.legacy_comment_filter = true;
    let summary = harness.collector().run(&legacy, today()).await.unwrap();

    assert_eq!(summary.hosts.len(), 2);
    assert_eq!(summary.hosts[0].address, "#10.0.0.9");
    assert_eq!(summary.hosts[0].outcome, HostOutcome::Unreachable);
    assert_eq!(harness.marker_text("old").unwrap(), "1970-01-01");
}

#[tokio::test]
async fn test_parallel_pass_reports_in_fleet_order() {
    let harness = TestHarness::new().unwrap();
    let lines: Vec<String> = (1..=6).map(|i| format!("10.0.1.{i} - node{i}")).collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    harness.write_fleet(&lines).unwrap();
    for i in 1..=6 {
        harness.probe.set_reachable(&format!("10.0.1.{i}"));
    }
    let config = harness.config();

    let summary = harness
        .collector()
        .with_max_parallel_hosts(3)
        .run(&config, today())
        .await
        .unwrap();

    let identifiers: Vec<_> = summary.hosts.iter().map(|r| r.identifier.clone()).collect();
    assert_eq!(identifiers, (1..=6).map(|i| format!("node{i}")).collect::<Vec<_>>());
    assert_eq!(summary.counts().collected, 6);
    for i in 1..=6 {
        assert_eq!(
            harness.entries(&format!("node{i}")).unwrap(),
            vec!["2024_06.tgz", "last_update"]
        );
    }
}

#[tokio::test]
async fn test_duplicate_entries_share_a_directory() {
    let harness = TestHarness::new().unwrap();
    harness
        .write_fleet(&["10.0.0.5 - alpha", "10.0.0.6 - beta", "10.0.0.5 - alpha"])
        .unwrap();
    harness.probe.set_reachable("10.0.0.5");

    let summary = harness
        .collector()
        .with_max_parallel_hosts(4)
        .run(&harness.config(), today())
        .await
        .unwrap();

    assert_eq!(summary.hosts.len(), 3);
    // both records were reconciled as stale; the second fetch reseals the month
    assert_eq!(harness.transport.get_fetched_addresses(), vec!["10.0.0.5", "10.0.0.5"]);
    assert_eq!(harness.entries("alpha").unwrap(), vec!["2024_06.tgz", "last_update"]);
}

#[tokio::test]
async fn test_skipped_entries_and_remote_root_reach_the_summary() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.transport.add_unreadable("btmp");

    let summary = harness
        .collector()
        .with_remote_root("/srv/logs")
        .run(&harness.config(), today())
        .await
        .unwrap();

    assert!(matches!(summary.hosts[0].outcome, HostOutcome::Collected { skipped: 1, .. }));
    let call = &harness.transport.get_calls()[0];
    assert_eq!(call.remote_root, "/srv/logs");
    assert_eq!(call.local_root, harness.host_dir("alpha"));
}

#[tokio::test]
async fn test_summary_json_export() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha", "10.0.0.7 - gamma"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();
    let path = harness.storage_root().join("summary.json");

    summary.write_json(&path).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["date"], "2024-06-18");
    assert_eq!(json["hosts"][0]["identifier"], "alpha");
    assert_eq!(json["hosts"][0]["outcome"]["status"], "collected");
    assert_eq!(json["hosts"][1]["outcome"]["status"], "unreachable");
    assert_eq!(json["hosts"][1]["last_update"], "1970-01-01");
    assert!(json["run_id"].as_str().is_some());
}

#[tokio::test]
async fn test_fetched_tarball_is_sealed_and_removed() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha"]).unwrap();
    harness.probe.set_reachable("10.0.0.5");
    harness.transport.set_tree(vec![
        (PathBuf::from("syslog"), b"boot ok\n".to_vec()),
        (PathBuf::from("installer-logs.tgz"), b"remote tarball".to_vec()),
    ]);

    let summary = harness.collector().run(&harness.config(), today()).await.unwrap();

    assert!(matches!(summary.hosts[0].outcome, HostOutcome::Collected { files: 2, .. }));
    assert_eq!(harness.entries("alpha").unwrap(), vec!["2024_06.tgz", "last_update"]);
    assert_eq!(
        harness.archive_members("alpha", "2024_06.tgz").unwrap(),
        vec!["alpha", "alpha/installer-logs.tgz", "alpha/last_update", "alpha/syslog"]
    );
}

#[tokio::test]
async fn test_missing_env_password_fails_only_stale_hosts() {
    let harness = TestHarness::new().unwrap();
    harness.write_fleet(&["10.0.0.5 - alpha", "10.0.0.6 - beta"]).unwrap();
    harness.seed_marker("beta", date(2024, 6, 8)).unwrap();
    harness.seed_file("beta", "syslog", b"stray").unwrap();
    harness.probe.set_reachable("10.0.0.5");
    let collector = Collector::new(
        Arc::new(harness.transport.clone()),
        Arc::new(harness.probe.clone()),
        Arc::new(EnvCredentials::with_vars(
            Some("logreader".to_string()),
            "LOGVAULT_FLEET_TEST_USER",
            "LOGVAULT_FLEET_TEST_PASSWORD",
        )),
    );

    let summary = collector.run(&harness.config(), today()).await.unwrap();

    match &summary.hosts[0].outcome {
        HostOutcome::FetchFailed { error_kind, .. } => assert_eq!(error_kind, "credentials"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(summary.hosts[1].outcome, HostOutcome::Fresh { purged: 1 });
    assert_eq!(harness.marker_text("alpha").unwrap(), "1970-01-01");
    assert!(harness.transport.get_calls().is_empty());
}
