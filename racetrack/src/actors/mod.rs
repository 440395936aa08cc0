//! Actors of a race.
//!
//! - `coordinator`: one per race, fans lifecycle requests out to the hosts
//! - `host`: one per target host, owns the engine lifecycle of that host
//! - `remote_host`: stands in for a host actor that runs on another node
//! - `driver`: runs the workload for each lap

pub mod coordinator;
pub mod driver;
pub mod host;
pub mod remote_host;

use std::any::Any;
use std::time::Duration;

use ractor::{ActorRef, ActorStatus};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Render an error and all of its sources, one per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Text of a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// Stop `actor` and wait for it, unless it is already on its way out.
pub async fn stop_actor<M: ractor::Message>(actor: &ActorRef<M>, reason: &str) {
    if matches!(
        actor.get_status(),
        ActorStatus::Stopping | ActorStatus::Stopped
    ) {
        return;
    }
    if let Err(e) = actor
        .stop_and_wait(Some(reason.to_string()), Some(STOP_TIMEOUT))
        .await
    {
        tracing::warn!(actor_id = %actor.get_id(), error = %e, "Actor did not stop in time");
    }
}
