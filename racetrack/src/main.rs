use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    racetrack::cli::run().await
}
