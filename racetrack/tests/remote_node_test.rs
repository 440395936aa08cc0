//! Two nodes in one process, talking over loopback TCP.
//!
//! The leader runs on 127.0.0.1 and the worker on 127.0.0.2, so placement
//! by ip has to cross the node server to reach the worker's host actor.
//!
//! Run:
//!   cargo test -p racetrack --test remote_node_test -- --nocapture

mod support;

use std::sync::Arc;
use std::time::Duration;

use racetrack::console::Console;
use racetrack::runtime::registry::NodeEndpoint;
use racetrack::{
    BootstrapMode, BootstrapParams, CoordinatorActor, CoordinatorArguments, CoordinatorMsg,
    RuntimeHandle,
};
use racetrack_types::{LifecycleReply, LifecycleRequest, Requirements, RunMode, Transport};
use ractor::Actor;

use support::{event_log, events, race_config, EventLog, RecordingCatalog};

const LEADER_IP: &str = "127.0.0.1";
const WORKER_IP: &str = "127.0.0.2";

fn params(local_ip: &str, convention_port: u16, log: EventLog) -> BootstrapParams {
    BootstrapParams {
        mode: BootstrapMode::Create,
        prefer_local_only: false,
        local_ip: Some(local_ip.to_string()),
        coordinator_ip: Some(LEADER_IP.to_string()),
        transport: Transport::Tcp,
        convention_port,
        node_port: 0,
        catalog: Arc::new(RecordingCatalog::new(log)),
    }
}

async fn wait_for_worker(leader: &RuntimeHandle) {
    for _ in 0..50 {
        if leader
            .resolve(Requirements::new().ip(WORKER_IP))
            .await
            .unwrap()
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("worker never joined the leader");
}

#[tokio::test]
async fn test_worker_joins_and_hosts_a_remote_target() {
    let leader_log = event_log();
    let worker_log = event_log();

    let leader = RuntimeHandle::standalone(params(LEADER_IP, 0, leader_log.clone()))
        .await
        .expect("leader runtime");
    assert!(leader.capabilities().coordinator);
    let convention_port = leader
        .convention_address()
        .expect("leader listens for workers")
        .port();

    let worker = RuntimeHandle::standalone(params(WORKER_IP, convention_port, worker_log.clone()))
        .await
        .expect("worker runtime");
    assert!(!worker.capabilities().coordinator);
    wait_for_worker(&leader).await;

    let entry = leader
        .resolve(Requirements::new().ip(WORKER_IP))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.capabilities.ip, WORKER_IP);
    assert_eq!(entry.endpoint, NodeEndpoint::Remote(worker.node_address().unwrap()));

    let (coordinator, handle) = Actor::spawn(
        None,
        CoordinatorActor,
        CoordinatorArguments {
            runtime: leader.clone(),
            console: Console::new(true),
        },
    )
    .await
    .expect("spawn CoordinatorActor");

    let (mut config, _root) = race_config(1, &["127.0.0.2:39200"]);
    config.runtime.node_wait_timeout_secs = 10;
    let ask = |request: LifecycleRequest| {
        let coordinator = coordinator.clone();
        async move {
            ractor::call!(coordinator, |reply| CoordinatorMsg::Lifecycle { request, reply })
                .expect("coordinator replies")
        }
    };

    let reply = ask(LifecycleRequest::StartEngine {
        config: Box::new(config),
        mode: RunMode::Distribution,
        build: false,
    })
    .await;
    match reply {
        LifecycleReply::EngineStarted { cluster_info, .. } => {
            assert_eq!(cluster_info.hosts[0].to_string(), "127.0.0.2:39200");
        }
        other => panic!("expected EngineStarted, got {other:?}"),
    }
    assert_eq!(
        ask(LifecycleRequest::OnBenchmarkStart { lap: 1 }).await,
        LifecycleReply::Success
    );
    assert_eq!(
        ask(LifecycleRequest::OnBenchmarkStop).await,
        LifecycleReply::Success
    );
    assert!(matches!(
        ask(LifecycleRequest::StopEngine).await,
        LifecycleReply::EngineStopped { .. }
    ));
    handle.await.expect("coordinator exits");

    // Everything ran on the worker, nothing on the leader.
    assert!(events(&leader_log).is_empty());
    assert_eq!(
        events(&worker_log),
        vec![
            "127.0.0.2 supply download",
            "127.0.0.2 prepare local-install",
            "127.0.0.2 launch in-process",
            "127.0.0.2 benchmark-start",
            "127.0.0.2 benchmark-stop",
            "127.0.0.2 stop",
            "127.0.0.2 cleanup",
        ]
    );

    worker.shutdown().await;
    leader.shutdown().await;
}

#[tokio::test]
async fn test_missing_node_times_out_with_launch_failure() {
    let leader = RuntimeHandle::standalone(params(LEADER_IP, 0, event_log()))
        .await
        .expect("leader runtime");
    let (coordinator, _handle) = Actor::spawn(
        None,
        CoordinatorActor,
        CoordinatorArguments {
            runtime: leader.clone(),
            console: Console::new(true),
        },
    )
    .await
    .expect("spawn CoordinatorActor");

    let (mut config, _root) = race_config(1, &["10.0.0.5:9200"]);
    config.runtime.node_wait_timeout_secs = 1;
    let reply = ractor::call!(coordinator, |reply| CoordinatorMsg::Lifecycle {
        request: LifecycleRequest::StartEngine {
            config: Box::new(config),
            mode: RunMode::Distribution,
            build: false,
        },
        reply,
    })
    .expect("coordinator replies");
    match reply {
        LifecycleReply::Failure { kind, message, .. } => {
            assert_eq!(kind, racetrack_types::FailureKind::Launch);
            assert!(message.contains("10.0.0.5"));
        }
        other => panic!("expected Failure, got {other:?}"),
    }

    coordinator.stop(None);
    leader.shutdown().await;
}
