//! Race control loop tests.
//!
//! Drives whole races through a local runtime with recording strategies and
//! a recording workload, then checks the order in which the engine
//! lifecycle was driven and what ended up in the race store.
//!
//! Run:
//!   cargo test -p racetrack --test race_control_test -- --nocapture

mod support;

use racetrack::racecontrol::{self, RaceOutcome};
use racetrack::store::{FileRaceStore, RaceStatus};
use racetrack::RaceError;
use racetrack_types::RunMode;

use support::{event_log, events, race_config, race_fixture, RecordingCatalog};

fn lap_events(lap: u32) -> Vec<String> {
    vec![
        "127.0.0.1 benchmark-start".to_string(),
        format!("workload lap {lap}"),
        "127.0.0.1 benchmark-stop".to_string(),
    ]
}

// ─── Full races ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_laps_drive_the_full_lifecycle_in_order() {
    let (config, root) = race_config(3, &["127.0.0.1:39200"]);
    let timestamp = config.system.race_timestamp.clone();
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), None).await;

    let outcome = racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false)
        .await
        .expect("race succeeds");
    assert_eq!(outcome, RaceOutcome::Completed { laps: 3 });

    let mut expected = vec![
        "127.0.0.1 supply download".to_string(),
        "127.0.0.1 prepare local-install".to_string(),
        "127.0.0.1 launch in-process".to_string(),
    ];
    for lap in 1..=3 {
        expected.extend(lap_events(lap));
    }
    expected.push("127.0.0.1 stop".to_string());
    expected.push("127.0.0.1 cleanup".to_string());
    assert_eq!(events(&fixture.events), expected);

    let record = FileRaceStore::new(fixture.root.path())
        .find_by_timestamp(&timestamp)
        .expect("race recorded");
    assert_eq!(record.status, RaceStatus::Completed);
    assert_eq!(record.laps, 3);
    assert_eq!(record.cluster.hosts.len(), 1);
    assert_eq!(record.system_info.get("node_127.0.0.1").map(String::as_str), Some("up"));

    let service_time = record
        .results
        .iter()
        .find(|s| s.name == "service_time")
        .expect("workload metrics summarized");
    assert_eq!(service_time.count, 3);
    assert_eq!(service_time.max, 30.0);
    assert!(record.results.iter().any(|s| s.name == "node_uptime"));

    fixture.runtime.shutdown().await;
}

#[tokio::test]
async fn test_distribution_pipeline_defaults_to_local_host() {
    let (mut config, root) = race_config(1, &[]);
    config.race.pipeline = "from-distribution".to_string();
    config.mechanic.distribution_version = Some("8.0.0".to_string());
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), None).await;

    let outcome = racecontrol::pipelines::run(fixture.ctx.clone())
        .await
        .expect("pipeline succeeds");
    assert_eq!(outcome, RaceOutcome::Completed { laps: 1 });
    assert_eq!(
        events(&fixture.events).first().map(String::as_str),
        Some("127.0.0.1 supply download")
    );

    fixture.runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_pipeline_is_a_configuration_error() {
    let (mut config, root) = race_config(1, &["127.0.0.1:39200"]);
    config.race.pipeline = "from-nowhere".to_string();
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), None).await;

    let err = racecontrol::pipelines::run(fixture.ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RaceError::Config(_)));
    assert!(err.to_string().contains("Unknown pipeline [from-nowhere]"));
    assert!(events(&fixture.events).is_empty());

    fixture.runtime.shutdown().await;
}

// ─── Setup failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_distribution_without_hosts_fails_before_any_host_starts() {
    let (config, root) = race_config(1, &[]);
    let timestamp = config.system.race_timestamp.clone();
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), None).await;

    let err = racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RaceError::Setup(_)), "got {err:?}");
    assert!(events(&fixture.events).is_empty());
    assert!(FileRaceStore::new(fixture.root.path())
        .find_by_timestamp(&timestamp)
        .is_err());

    fixture.runtime.shutdown().await;
}

#[tokio::test]
async fn test_remote_target_needs_a_networked_runtime() {
    let (config, root) = race_config(1, &["10.0.0.5:9200"]);
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), None).await;

    let err = racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RaceError::Setup(_)), "got {err:?}");
    assert!(err.to_string().contains("racetrackd start"));
    assert!(events(&fixture.events).is_empty());

    fixture.runtime.shutdown().await;
}

#[tokio::test]
async fn test_panicking_supplier_fails_setup_without_hanging() {
    let mut catalog = RecordingCatalog::new(event_log());
    catalog.panic_on_supply = true;
    let (config, root) = race_config(2, &["127.0.0.1:39200"]);
    let fixture = race_fixture(config, root, catalog, None).await;

    let err = racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false)
        .await
        .unwrap_err();
    match err {
        RaceError::Remote { message, cause } => {
            assert_eq!(message, "Could not execute command");
            assert!(cause.contains("supplier exploded"));
        }
        other => panic!("expected a remote failure, got {other:?}"),
    }
    assert!(events(&fixture.events).is_empty());

    fixture.runtime.shutdown().await;
}

// ─── Cancellation and teardown failures ─────────────────────────────────────

#[tokio::test]
async fn test_cancel_on_second_lap_skips_the_rest_but_tears_down() {
    let (config, root) = race_config(3, &["127.0.0.1:39200"]);
    let timestamp = config.system.race_timestamp.clone();
    let fixture = race_fixture(config, root, RecordingCatalog::new(event_log()), Some(2)).await;

    let outcome = racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false)
        .await
        .expect("cancellation is not an error");
    assert_eq!(outcome, RaceOutcome::Cancelled { completed_laps: 1 });

    let recorded = events(&fixture.events);
    assert!(!recorded.contains(&"workload lap 3".to_string()));
    let starts = recorded.iter().filter(|e| e.ends_with("benchmark-start")).count();
    let stops = recorded.iter().filter(|e| e.ends_with("benchmark-stop")).count();
    assert_eq!((starts, stops), (2, 1));
    assert_eq!(
        &recorded[recorded.len() - 3..],
        &[
            "workload lap 2".to_string(),
            "127.0.0.1 stop".to_string(),
            "127.0.0.1 cleanup".to_string(),
        ]
    );

    let record = FileRaceStore::new(fixture.root.path())
        .find_by_timestamp(&timestamp)
        .expect("race recorded");
    assert_eq!(record.status, RaceStatus::Cancelled);

    fixture.runtime.shutdown().await;
}

#[tokio::test]
async fn test_cleanup_failure_surfaces_as_remote_error() {
    let mut catalog = RecordingCatalog::new(event_log());
    catalog.fail_cleanup = true;
    let (config, root) = race_config(1, &["127.0.0.1:39200"]);
    let timestamp = config.system.race_timestamp.clone();
    let fixture = race_fixture(config, root, catalog, None).await;

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        racecontrol::race(fixture.ctx.clone(), RunMode::Distribution, false),
    )
    .await
    .expect("race must not hang");

    match result {
        Err(RaceError::Remote { message, cause }) => {
            assert_eq!(message, "Could not execute command");
            assert!(cause.contains("install directory is still in use"));
        }
        other => panic!("expected a remote failure, got {other:?}"),
    }
    assert_eq!(
        events(&fixture.events).last().map(String::as_str),
        Some("127.0.0.1 cleanup")
    );
    let record = FileRaceStore::new(fixture.root.path())
        .find_by_timestamp(&timestamp)
        .expect("race recorded");
    assert_eq!(record.status, RaceStatus::Failed);

    fixture.runtime.shutdown().await;
}
