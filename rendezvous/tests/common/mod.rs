#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rendezvous::auth::SharedSecret;
use rendezvous::client::RendezvousClient;
use rendezvous::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use rendezvous::error::RendezvousResult;
use rendezvous::server::{RendezvousServer, RendezvousService, ServerIdentity};
use rendezvous_config::shared::ServerConfig;
use rendezvous_telemetry::tracing::init_test_tracing;
use tokio::task::JoinHandle;

/// Upper bound for anything a test expects to happen.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which a blocked operation must not complete.
pub const BLOCKED_WINDOW: Duration = Duration::from_millis(300);

/// A rendezvous server running on an ephemeral localhost port.
pub struct TestServer {
    pub identity: ServerIdentity,
    pub service: Arc<RendezvousService>,
    shutdown_tx: ShutdownTx,
    task: JoinHandle<RendezvousResult<()>>,
}

impl TestServer {
    /// Connects a new authenticated client.
    pub async fn client(&self) -> RendezvousClient {
        RendezvousClient::connect(&self.address(), &self.identity.secret)
            .await
            .unwrap()
    }

    pub fn address(&self) -> String {
        self.identity.address.to_string()
    }

    /// Stops the server and waits for the accept loop to exit.
    pub async fn shutdown(self) {
        self.shutdown_tx.shutdown().unwrap();
        tokio::time::timeout(TIMEOUT, self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

pub fn local_config(nprocs: usize) -> ServerConfig {
    let mut config = ServerConfig::new(nprocs);
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config
}

pub async fn spawn_server(nprocs: usize) -> TestServer {
    spawn_server_with_config(local_config(nprocs)).await
}

pub async fn spawn_server_with_config(config: ServerConfig) -> TestServer {
    init_test_tracing();

    let server = RendezvousServer::bind_with_secret(config, SharedSecret::generate())
        .await
        .unwrap();
    let identity = server.identity().unwrap();
    let service = server.service().clone();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let task = tokio::spawn(server.run(shutdown_rx));

    TestServer {
        identity,
        service,
        shutdown_tx,
        task,
    }
}

/// Asserts that `task` is still running after [`BLOCKED_WINDOW`].
pub async fn assert_blocked<T>(task: &JoinHandle<T>) {
    tokio::time::sleep(BLOCKED_WINDOW).await;
    assert!(!task.is_finished(), "task completed while it should block");
}

/// Awaits `future`, failing the test after [`TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("operation did not complete in time")
}
