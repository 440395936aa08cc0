//! Logging setup.
//!
//! Output is split into two independently routed streams:
//!
//! - `actors`: everything logged below `racetrack::actors` and
//!   `racetrack::runtime` (message protocol, placement, transport)
//! - `application`: everything else (control loop, collaborators, CLI)
//!
//! Each stream goes to the console, to its own file in the race log
//! directory, or nowhere. The level comes from `RUST_LOG` (default `info`).

mod logging;

pub use logging::{init_logging, is_actor_target, rotate_existing, LoggingSettings};
