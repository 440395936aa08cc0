//! HostActor lifecycle tests.
//!
//! Verifies that a host actor:
//!   - can be reused for a second race after `StopEngine`
//!   - turns a panicking strategy into a `Failure` reply and keeps running
//!   - stops a running engine when it is stopped itself
//!
//! Run:
//!   cargo test -p racetrack --test host_actor_test -- --nocapture

mod support;

use std::sync::Arc;

use racetrack::actors::host::EnginePhase;
use racetrack::{HostActor, HostArguments, HostMsg};
use racetrack_types::{FailureKind, LifecycleReply, LifecycleRequest, RunMode};
use ractor::{Actor, ActorRef};

use support::{event_log, events, race_config, RecordingCatalog};

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn spawn_host(catalog: RecordingCatalog) -> (ActorRef<HostMsg>, ractor::concurrency::JoinHandle<()>) {
    Actor::spawn(
        None,
        HostActor,
        HostArguments {
            catalog: Arc::new(catalog),
            single_machine: true,
        },
    )
    .await
    .expect("spawn HostActor")
}

async fn ask(host: &ActorRef<HostMsg>, request: LifecycleRequest) -> LifecycleReply {
    ractor::call!(host, |reply| HostMsg::Lifecycle { request, reply }).expect("host replies")
}

async fn phase(host: &ActorRef<HostMsg>) -> EnginePhase {
    ractor::call!(host, |reply| HostMsg::GetPhase { reply }).expect("host replies")
}

fn start_distribution() -> LifecycleRequest {
    let (config, _root) = race_config(1, &["127.0.0.1:39200"]);
    LifecycleRequest::StartEngine {
        config: Box::new(config),
        mode: RunMode::Distribution,
        build: false,
    }
}

async fn run_one_race(host: &ActorRef<HostMsg>) {
    assert!(matches!(
        ask(host, start_distribution()).await,
        LifecycleReply::EngineStarted { .. }
    ));
    assert_eq!(
        ask(host, LifecycleRequest::OnBenchmarkStart { lap: 1 }).await,
        LifecycleReply::Success
    );
    assert_eq!(
        ask(host, LifecycleRequest::OnBenchmarkStop).await,
        LifecycleReply::Success
    );
    assert!(matches!(
        ask(host, LifecycleRequest::StopEngine).await,
        LifecycleReply::EngineStopped { .. }
    ));
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_host_is_reusable_after_stop_engine() {
    let log = event_log();
    let (host, handle) = spawn_host(RecordingCatalog::new(log.clone())).await;

    run_one_race(&host).await;
    let first_race = events(&log);
    assert_eq!(phase(&host).await, EnginePhase::Idle);

    run_one_race(&host).await;
    let both_races = events(&log);
    assert_eq!(both_races.len(), first_race.len() * 2);
    assert_eq!(&both_races[first_race.len()..], first_race.as_slice());

    host.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_second_start_without_stop_is_rejected() {
    let log = event_log();
    let (host, handle) = spawn_host(RecordingCatalog::new(log.clone())).await;

    assert!(matches!(
        ask(&host, start_distribution()).await,
        LifecycleReply::EngineStarted { .. }
    ));
    match ask(&host, start_distribution()).await {
        LifecycleReply::Failure { kind, cause, .. } => {
            assert_eq!(kind, FailureKind::Execution);
            assert!(cause.contains("already running"));
        }
        other => panic!("expected Failure, got {other:?}"),
    }
    assert_eq!(phase(&host).await, EnginePhase::Started);

    host.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_panicking_strategy_becomes_failure_reply() {
    let mut catalog = RecordingCatalog::new(event_log());
    catalog.panic_on_supply = true;
    let (host, handle) = spawn_host(catalog).await;

    match ask(&host, start_distribution()).await {
        LifecycleReply::Failure {
            kind,
            message,
            cause,
        } => {
            assert_eq!(kind, FailureKind::Execution);
            assert_eq!(message, "Could not execute command");
            assert!(cause.contains("supplier exploded"));
        }
        other => panic!("expected Failure, got {other:?}"),
    }

    // Still alive and idle.
    assert_eq!(phase(&host).await, EnginePhase::Idle);

    host.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_stopping_host_stops_running_engine() {
    let log = event_log();
    let (host, handle) = spawn_host(RecordingCatalog::new(log.clone())).await;

    assert!(matches!(
        ask(&host, start_distribution()).await,
        LifecycleReply::EngineStarted { .. }
    ));
    host.stop(None);
    handle.await.unwrap();

    let recorded = events(&log);
    assert_eq!(
        &recorded[recorded.len() - 2..],
        &["127.0.0.1 stop".to_string(), "127.0.0.1 cleanup".to_string()]
    );
}
