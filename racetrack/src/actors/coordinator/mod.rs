//! CoordinatorActor - one per race, owns the host actors of that race.
//!
//! The control loop talks to the coordinator only. The coordinator places
//! one host actor per target host, fans every lifecycle request out to all of
//! them and answers the control loop once every host has replied.
//!
//! ## Placement
//!
//! ```text
//! external mode          -> one HostActor on the coordinator node
//! localhost / 127.0.0.1  -> HostActor on the coordinator node
//! any other host         -> node with a matching `ip` capability
//!                           (RemoteHostActor when it lives in another process)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (coordinator, _handle) = Actor::spawn(
//!     None,
//!     CoordinatorActor,
//!     CoordinatorArguments { runtime, console },
//! )
//! .await?;
//! let reply = ractor::call!(coordinator, |reply| CoordinatorMsg::Lifecycle { request, reply })?;
//! ```
//!
//! A coordinator is single use: it stops itself after relaying
//! `EngineStopped`.

pub mod actor;
pub mod placement;
pub mod protocol;

pub use actor::{CoordinatorActor, CoordinatorArguments, CoordinatorState};
pub use placement::{PlacedHost, PlacementError};
pub use protocol::{aggregate, CoordinatorMsg};
