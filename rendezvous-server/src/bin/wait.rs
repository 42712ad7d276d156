//! Waits once on a partition barrier of a running rendezvous server.
//!
//! Prints the arrival index on release and exits non-zero on any failure,
//! including a broken barrier. Meant to be called from worker scripts after a
//! partition was written.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rendezvous::client::RendezvousClient;
use rendezvous::server::{ADDRESS_ENV_VAR, SECRET_ENV_VAR};
use rendezvous_config::shared::ClientConfig;
use rendezvous_telemetry::tracing::init_tracing;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "rendezvous-wait", version, about)]
struct WaitArgs {
    /// Address printed by the server (`ip:port`)
    #[arg(long, env = ADDRESS_ENV_VAR)]
    address: String,
    /// Base64 shared secret printed by the server
    #[arg(long, env = SECRET_ENV_VAR, hide_env_values = true)]
    secret: String,
    /// Inclusive start of the partition
    #[arg(long)]
    start: String,
    /// End of the partition
    #[arg(long)]
    end: String,
    /// Break the barrier for everyone if it does not release in time (default: wait forever)
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Time allowed to connect and authenticate (default: 10)
    #[arg(long)]
    connect_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WaitArgs::parse();
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let mut client_config = ClientConfig::new(args.address, SecretString::new(args.secret));
    if let Some(secs) = args.connect_timeout_secs {
        client_config.connect_timeout_ms = secs.saturating_mul(1000);
    }

    let client = RendezvousClient::connect_with_config(&client_config)
        .await
        .with_context(|| format!("failed to connect to {}", client_config.address))?;

    let barrier = client
        .get_barrier(args.start, args.end)
        .await
        .context("failed to fetch barrier")?;

    let index = match args.timeout_secs {
        Some(secs) => barrier.wait_timeout(Duration::from_secs(secs)).await,
        None => barrier.wait().await,
    }
    .with_context(|| format!("barrier {} did not release", barrier.key()))?;

    info!(key = %barrier.key(), index, "barrier released");
    println!("{index}");

    Ok(())
}
