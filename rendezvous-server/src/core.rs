use std::io::Write;

use rendezvous::concurrency::shutdown::create_shutdown_channel;
use rendezvous::server::{RendezvousServer, ServerIdentity};
use rendezvous_config::shared::ServerConfig;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::error::ServerResult;

/// Binds the server, publishes its identity and serves until a termination signal.
pub async fn start_server_with_config(server_config: ServerConfig) -> ServerResult<()> {
    info!("starting rendezvous server");

    log_config(&server_config);

    let server = RendezvousServer::bind(server_config).await?;
    publish_identity(&server.identity()?)?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    // Registered before serving so an early SIGTERM is not lost.
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down rendezvous server");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down rendezvous server");
            }
        }

        if let Err(e) = shutdown_tx.shutdown() {
            warn!(error = ?e, "failed to send shutdown signal");
        }
    });

    let result = server.run(shutdown_rx).await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("rendezvous server stopped");

    Ok(())
}

/// Writes the address and secret to stdout for the workers' launcher.
fn publish_identity(identity: &ServerIdentity) -> ServerResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{identity}")?;
    stdout.flush()?;

    Ok(())
}

fn log_config(config: &ServerConfig) {
    info!(
        host = %config.host,
        port = config.port,
        nprocs = config.nprocs,
        wait_timeout_ms = ?config.wait_timeout_ms,
        abandon_policy = %config.abandon_policy,
        handshake_timeout_ms = config.handshake_timeout_ms,
        metrics_port = ?config.metrics_port,
        "server config"
    );
}
