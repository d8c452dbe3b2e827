//! `edgecoderd` — the EdgeCoder coordinator daemon.
//!
//! Exit codes: 0 clean shutdown, 1 fatal configuration or bootstrap failure,
//! 2 persistent peer isolation (operator intervention required).

mod config;
mod coordinator;
mod providers;

use clap::Parser;
use config::NodeConfig;
use coordinator::{Coordinator, ExitReason};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = NodeConfig::parse();

    if let Err(e) = edgecoder_telemetry::init_tracing() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(1);
    }
    edgecoder_telemetry::install_metrics();

    let coordinator = match Coordinator::build(config) {
        Ok(c) => c,
        Err(e) => {
            error!(target: "node", error = %e, "fatal configuration error");
            return ExitCode::from(1);
        }
    };

    match coordinator.run().await {
        Ok(ExitReason::Clean) => ExitCode::SUCCESS,
        Ok(ExitReason::Isolated) => ExitCode::from(2),
        Err(e) => {
            error!(target: "node", error = %e, "fatal runtime error");
            return ExitCode::from(1);
        }
    }
}
