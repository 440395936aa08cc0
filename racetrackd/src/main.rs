//! racetrackd: worker node daemon
//!
//! Joins the actor runtime of a race coordinator and hosts benchmark
//! candidates on this machine until it is stopped.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use racetrack::console::Console;
use racetrack::mechanic::BuiltinCatalog;
use racetrack::observability::{init_logging, LoggingSettings};
use racetrack::paths;
use racetrack::runtime::{self, node, shutdown_with_retries, BootstrapMode, BootstrapParams};
use racetrack_types::{LogRoute, RuntimeSettings, Transport};

const EXIT_FAILURE: u8 = 64;

#[derive(Parser, Debug)]
#[command(name = "racetrackd")]
#[command(about = "Hosts benchmark candidates on this machine for a racetrack coordinator")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the node and join the coordinator
    Start {
        /// IP of this node
        #[arg(long)]
        node_ip: String,

        /// IP of the coordinator node
        #[arg(long)]
        coordinator_ip: String,

        #[arg(long, default_value_t = RuntimeSettings::default().convention_port)]
        convention_port: u16,

        /// Port host placements are served on
        #[arg(long, default_value_t = RuntimeSettings::default().node_port)]
        node_port: u16,

        /// Root directory for logs and installations
        #[arg(long)]
        root: Option<PathBuf>,

        /// Log to the console instead of a file
        #[arg(long)]
        console_log: bool,
    },
    /// Ask a running node to shut down
    Stop {
        #[arg(long)]
        node_ip: String,

        #[arg(long, default_value_t = RuntimeSettings::default().node_port)]
        node_port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let console = Console::new(false);

    let result = match args.command {
        Command::Start {
            node_ip,
            coordinator_ip,
            convention_port,
            node_port,
            root,
            console_log,
        } => {
            start(
                node_ip,
                coordinator_ip,
                convention_port,
                node_port,
                root.unwrap_or_else(paths::default_root),
                console_log,
                console,
            )
            .await
        }
        Command::Stop { node_ip, node_port } => stop(&node_ip, node_port, console).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console.error(format!("{e:#}"));
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn start(
    node_ip: String,
    coordinator_ip: String,
    convention_port: u16,
    node_port: u16,
    root: PathBuf,
    console_log: bool,
    console: Console,
) -> Result<()> {
    let route = if console_log {
        LogRoute::Console
    } else {
        LogRoute::File
    };
    init_logging(&LoggingSettings {
        application: route,
        actors: route,
        log_dir: root.join("logs").join(format!("racetrackd-{node_ip}")),
    })?;

    let handle = runtime::bootstrap(BootstrapParams {
        mode: BootstrapMode::Create,
        prefer_local_only: false,
        local_ip: Some(node_ip.clone()),
        coordinator_ip: Some(coordinator_ip.clone()),
        transport: Transport::Tcp,
        convention_port,
        node_port,
        catalog: Arc::new(BuiltinCatalog),
    })
    .await?;
    tracing::info!(%node_ip, %coordinator_ip, "racetrackd started");
    console.info(format!(
        "Node {node_ip} is up and joins the coordinator at {coordinator_ip}:{convention_port}."
    ));

    let stopped = handle.shutdown_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupt received"),
        _ = stopped.cancelled() => tracing::info!("Shutdown requested by remote"),
    }

    let interrupts = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|_| ((), ()))
    })
    .boxed();
    shutdown_with_retries(|| handle.shutdown(), interrupts, &console).await;
    console.info(format!("Node {node_ip} stopped."));
    Ok(())
}

async fn stop(node_ip: &str, node_port: u16, console: Console) -> Result<()> {
    let address = format!("{node_ip}:{node_port}");
    if !node::request_shutdown(&address).await? {
        bail!("No racetrackd is running on {address}.");
    }
    console.info(format!("Stopped racetrackd on {address}."));
    Ok(())
}
