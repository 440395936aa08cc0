//! Workload definitions and the collaborator that executes them.
//!
//! The driver actor hands each lap to a [`WorkloadExecutor`]. The built-in
//! executor measures TCP connect latency against every target host.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use racetrack_types::{ClusterInfo, HostDescriptor, MetricRecord, RaceConfig, SystemInfo};
use tokio::net::TcpStream;

pub const CONNECT_LATENCY_METRIC: &str = "connect_latency";
pub const CONNECT_ERRORS_METRIC: &str = "connect_errors";

#[derive(Debug, Clone, Copy)]
pub struct ChallengeDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub default: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub challenges: &'static [ChallengeDescriptor],
}

impl TrackDescriptor {
    pub fn default_challenge(&self) -> Option<&ChallengeDescriptor> {
        self.challenges.iter().find(|c| c.default)
    }

    pub fn challenge(&self, name: &str) -> Option<&ChallengeDescriptor> {
        self.challenges.iter().find(|c| c.name == name)
    }
}

pub const TRACKS: &[TrackDescriptor] = &[TrackDescriptor {
    name: "connect-latency",
    description: "TCP connect latency against every target host",
    challenges: &[
        ChallengeDescriptor {
            name: "sequential",
            description: "Connect to one host at a time",
            default: true,
        },
        ChallengeDescriptor {
            name: "burst",
            description: "Connect to all hosts at once",
            default: false,
        },
    ],
}];

pub fn find_track(name: &str) -> Option<&'static TrackDescriptor> {
    TRACKS.iter().find(|t| t.name == name)
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("Unknown track [{0}]. You can list the available tracks with racetrack list tracks.")]
    UnknownTrack(String),

    #[error("Unknown challenge [{challenge}] for track [{track}].")]
    UnknownChallenge { track: String, challenge: String },

    #[error("Track [{0}] has no default challenge. Please specify one with --challenge.")]
    NoDefaultChallenge(String),

    #[error("There are no hosts to run the workload against.")]
    NoTargets,
}

/// What the driver runs on every lap.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadDefinition {
    pub track: String,
    pub challenge: String,
    pub iterations: u32,
    pub targets: Vec<HostDescriptor>,
}

/// Resolve the configured track and challenge against a started cluster.
///
/// The hosts the cluster reports take precedence over the configured ones.
pub fn load_workload(
    config: &RaceConfig,
    cluster: &ClusterInfo,
) -> Result<WorkloadDefinition, WorkloadError> {
    let track = find_track(&config.track.name)
        .ok_or_else(|| WorkloadError::UnknownTrack(config.track.name.clone()))?;
    let challenge = match &config.track.challenge {
        Some(name) => track
            .challenge(name)
            .ok_or_else(|| WorkloadError::UnknownChallenge {
                track: track.name.to_string(),
                challenge: name.clone(),
            })?,
        None => track
            .default_challenge()
            .ok_or_else(|| WorkloadError::NoDefaultChallenge(track.name.to_string()))?,
    };
    let targets = if cluster.hosts.is_empty() {
        config.client.target_hosts.clone()
    } else {
        cluster.hosts.clone()
    };
    if targets.is_empty() {
        return Err(WorkloadError::NoTargets);
    }

    Ok(WorkloadDefinition {
        track: track.name.to_string(),
        challenge: challenge.name.to_string(),
        iterations: config.track.iterations,
        targets,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadOutcome {
    Complete(Vec<MetricRecord>),
    /// The operator asked to stop; not an error.
    Cancelled,
    Failed { message: String, cause: String },
}

#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub config: RaceConfig,
    pub workload: WorkloadDefinition,
    pub meta_info: SystemInfo,
    pub lap: u32,
}

#[async_trait]
pub trait WorkloadExecutor: Send + Sync + 'static {
    async fn execute(&self, request: &BenchmarkRequest) -> WorkloadOutcome;
}

/// Times TCP connects to the target hosts.
#[derive(Debug, Clone)]
pub struct ConnectLatencyWorkload {
    connect_timeout: Duration,
}

impl Default for ConnectLatencyWorkload {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectLatencyWorkload {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn measure(&self, target: &HostDescriptor) -> Result<f64, String> {
        let started = Instant::now();
        let address = target.to_string();
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => Ok(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => Err(format!("{address}: {e}")),
            Err(_) => Err(format!("{address}: timed out")),
        }
    }
}

#[async_trait]
impl WorkloadExecutor for ConnectLatencyWorkload {
    async fn execute(&self, request: &BenchmarkRequest) -> WorkloadOutcome {
        let workload = &request.workload;
        let mut samples: Vec<(HostDescriptor, Result<f64, String>)> = Vec::new();

        for _ in 0..workload.iterations {
            if workload.challenge == "burst" {
                let results = futures::future::join_all(
                    workload.targets.iter().map(|target| self.measure(target)),
                )
                .await;
                samples.extend(workload.targets.iter().cloned().zip(results));
            } else {
                for target in &workload.targets {
                    let result = self.measure(target).await;
                    samples.push((target.clone(), result));
                }
            }
        }

        let mut records = Vec::new();
        let mut last_error = None;
        for target in &workload.targets {
            let mut errors = 0u32;
            for (host, result) in samples.iter().filter(|(host, _)| host == target) {
                match result {
                    Ok(millis) => records.push(
                        MetricRecord::new(CONNECT_LATENCY_METRIC, *millis, "ms")
                            .with_meta("host", host.to_string()),
                    ),
                    Err(e) => {
                        errors += 1;
                        last_error = Some(e.clone());
                    }
                }
            }
            records.push(
                MetricRecord::new(CONNECT_ERRORS_METRIC, f64::from(errors), "")
                    .with_meta("host", target.to_string()),
            );
        }

        let measured = records.iter().any(|r| r.name == CONNECT_LATENCY_METRIC);
        if !measured && workload.iterations > 0 {
            return WorkloadOutcome::Failed {
                message: "Could not connect to any target host".to_string(),
                cause: last_error.unwrap_or_default(),
            };
        }
        tracing::debug!(lap = request.lap, samples = samples.len(), "Workload finished");
        WorkloadOutcome::Complete(records)
    }
}
