//! Rendezvous server binary.
//!
//! Hosts the per-partition barriers for one run of workers. Prints the
//! address and shared secret workers need on stdout, logs to stderr and runs
//! until it receives ctrl-c or `SIGTERM`.

use std::process::ExitCode;

use clap::Parser;
use rendezvous::metrics::register_metrics;
use rendezvous_telemetry::metrics::init_metrics;
use rendezvous_telemetry::tracing::init_tracing;

use crate::config::{ServerArgs, load_server_config};
use crate::core::start_server_with_config;
use crate::error::{ServerError, ServerResult};

mod config;
mod core;
mod error;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, initializes telemetry and serves until shutdown.
fn run() -> ServerResult<()> {
    let args = ServerArgs::parse();
    let server_config = load_server_config(&args)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ServerError::config)?;

    init_metrics(server_config.metrics_port).map_err(ServerError::config)?;
    register_metrics();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_server_with_config(server_config))?;

    Ok(())
}
