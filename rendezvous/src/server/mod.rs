//! TCP server hosting the barrier registry.
//!
//! One process serves one run: it owns a [`RendezvousService`] (registry,
//! shared secret and configuration) built at startup, accepts connections
//! until a shutdown is requested and handles each connection on its own task.
//! Nothing is persisted, so a restarted server starts with an empty registry
//! and a new secret.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use metrics::counter;
use rendezvous_config::shared::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::auth::SharedSecret;
use crate::barrier::BarrierOptions;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, RendezvousResult};
use crate::metrics::RENDEZVOUS_CONNECTIONS_ACCEPTED_TOTAL;
use crate::registry::BarrierRegistry;
use crate::rendezvous_error;

mod session;

/// Name of the variable under which the server address is published.
pub const ADDRESS_ENV_VAR: &str = "RENDEZVOUS_ADDRESS";

/// Name of the variable under which the shared secret is published.
pub const SECRET_ENV_VAR: &str = "RENDEZVOUS_SECRET";

/// Process wide state shared by every connection.
#[derive(Debug)]
pub struct RendezvousService {
    config: ServerConfig,
    secret: SharedSecret,
    registry: BarrierRegistry,
}

impl RendezvousService {
    /// Creates the service state for `config`, authenticating with `secret`.
    pub fn new(config: ServerConfig, secret: SharedSecret) -> Self {
        let registry = BarrierRegistry::new(BarrierOptions {
            parties: config.nprocs,
            abandon_policy: config.abandon_policy,
        });

        Self {
            config,
            secret,
            registry,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    pub fn registry(&self) -> &BarrierRegistry {
        &self.registry
    }
}

/// What workers need to reach a running server.
///
/// Its [`Display`](fmt::Display) form is the two `NAME=value` lines printed on
/// stdout at startup.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub address: SocketAddr,
    pub secret: SharedSecret,
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{ADDRESS_ENV_VAR}={}", self.address)?;
        write!(f, "{SECRET_ENV_VAR}={}", self.secret.to_base64())
    }
}

/// A bound, not yet running rendezvous server.
#[derive(Debug)]
pub struct RendezvousServer {
    listener: TcpListener,
    service: Arc<RendezvousService>,
}

impl RendezvousServer {
    /// Validates `config`, binds its address and generates a fresh secret.
    pub async fn bind(config: ServerConfig) -> RendezvousResult<Self> {
        Self::bind_with_secret(config, SharedSecret::generate()).await
    }

    /// Validates `config` and binds its address, authenticating with `secret`.
    pub async fn bind_with_secret(
        config: ServerConfig,
        secret: SharedSecret,
    ) -> RendezvousResult<Self> {
        config.validate().map_err(|err| {
            rendezvous_error!(
                ErrorKind::ConfigError,
                "Invalid server configuration",
                source: err
            )
        })?;

        let listener = TcpListener::bind(config.bind_address()).await?;
        info!(
            address = %listener.local_addr()?,
            parties = config.nprocs,
            abandon_policy = %config.abandon_policy,
            wait_timeout_ms = ?config.wait_timeout_ms,
            "rendezvous server bound"
        );

        Ok(Self {
            listener,
            service: Arc::new(RendezvousService::new(config, secret)),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> RendezvousResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the address and secret to hand to workers.
    pub fn identity(&self) -> RendezvousResult<ServerIdentity> {
        Ok(ServerIdentity {
            address: self.local_addr()?,
            secret: self.service.secret.clone(),
        })
    }

    pub fn service(&self) -> &Arc<RendezvousService> {
        &self.service
    }

    /// Accepts connections until `shutdown_rx` fires.
    ///
    /// Each connection runs on its own task. Errors of one connection are
    /// logged and end only that connection. On shutdown the listener is
    /// closed and all connection tasks are aborted.
    pub async fn run(self, mut shutdown_rx: ShutdownRx) -> RendezvousResult<()> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(
                        open_connections = connections.len(),
                        "shutting down rendezvous server"
                    );
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            // Accept failures such as fd exhaustion are transient.
                            warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };

                    counter!(RENDEZVOUS_CONNECTIONS_ACCEPTED_TOTAL).increment(1);
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "failed to disable nagle on connection");
                    }

                    let service = self.service.clone();
                    connections.spawn(
                        session::serve(stream, peer, service)
                            .instrument(info_span!("connection", %peer)),
                    );
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            error!(error = %err, "connection task panicked");
                        }
                    }
                }
            }
        }

        connections.shutdown().await;

        Ok(())
    }
}
