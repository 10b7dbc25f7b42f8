//! gitopscluster-operator - controller manager for GitOpsCluster resources.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Resolves options from flags and environment
//! - Runs the startup sequence and maps its outcome to the exit status

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use gitopscluster_operator::{Options, run_manager};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let options = Options::parse();
    info!(options = ?options, "Starting gitopscluster-operator");

    match run_manager(options.into_settings()).await {
        Ok(()) => {
            info!("Operator stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Operator exited with error");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gitopscluster_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();
    Ok(())
}
