//! Racetrack - distributed benchmark race orchestration
//!
//! This crate drives a benchmark against a cluster that may span several
//! hosts: it prepares the cluster, runs one or more laps of a workload and
//! tears the cluster down again, collecting metrics on the way.
//!
//! ## Architecture
//!
//! ```text
//! racecontrol (lap loop)
//! └── CoordinatorActor (one per race)
//!     ├── HostActor (in-process, per local target)
//!     └── RemoteHostActor ──tcp──> node server ──> HostActor (per remote target)
//!                                               └── EngineLifecycle
//!                                                   (supplier / provisioner / launcher)
//! ```

pub mod actors;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod mechanic;
pub mod metrics;
pub mod observability;
pub mod paths;
pub mod racecontrol;
pub mod reporter;
pub mod runtime;
pub mod store;
pub mod workload;

pub use actors::coordinator::{CoordinatorActor, CoordinatorArguments, CoordinatorMsg};
pub use actors::host::{HostActor, HostArguments, HostMsg};
pub use error::RaceError;
pub use racecontrol::{race, RaceContext, RaceOutcome};
pub use runtime::{bootstrap, BootstrapMode, BootstrapParams, RuntimeHandle};
