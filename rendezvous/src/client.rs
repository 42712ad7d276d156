//! Worker side of the rendezvous protocol.
//!
//! A [`RendezvousClient`] is one authenticated connection. It issues one
//! request at a time, so a worker that needs to block on several barriers
//! concurrently opens one client per concurrent wait.
//!
//! ```no_run
//! # async fn run() -> rendezvous::error::RendezvousResult<()> {
//! use rendezvous::auth::SharedSecret;
//! use rendezvous::client::RendezvousClient;
//!
//! let secret: SharedSecret = "q83vEjRWeJCrze8SNFZ4kKvN7xI0VniQq83vEjRWeJA=".parse()?;
//! let client = RendezvousClient::connect("10.0.0.1:50000", &secret).await?;
//!
//! let barrier = client.get_barrier("2024-01-01", "2024-01-02").await?;
//! // ... write the partition ...
//! barrier.wait().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rendezvous_config::shared::ClientConfig;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::SharedSecret;
use crate::barrier::BarrierStatus;
use crate::error::{ErrorKind, RendezvousResult};
use crate::protocol::codec::{FramedIo, framed, recv, send};
use crate::protocol::{Credential, Request, Response};
use crate::types::{HandleId, PartitionKey};
use crate::{bail, rendezvous_error};

/// The socket of a client, or `None` once a request on it was cancelled or failed.
///
/// A request owns the socket while it is in flight, so cancelling the request
/// closes the socket and the server sees the party leave.
type Connection = Option<FramedIo<TcpStream>>;

/// Authenticated connection to a rendezvous server.
///
/// Cloning is cheap; clones share the connection.
#[derive(Debug, Clone)]
pub struct RendezvousClient {
    conn: Arc<Mutex<Connection>>,
    parties: usize,
}

impl RendezvousClient {
    /// Connects to `address` and authenticates with `secret`, using the
    /// default connect timeout.
    pub async fn connect(address: &str, secret: &SharedSecret) -> RendezvousResult<Self> {
        let timeout = Duration::from_millis(ClientConfig::DEFAULT_CONNECT_TIMEOUT_MS);
        Self::connect_with_timeout(address, secret, timeout).await
    }

    /// Connects using `config`.
    pub async fn connect_with_config(config: &ClientConfig) -> RendezvousResult<Self> {
        config.validate().map_err(|err| {
            rendezvous_error!(
                ErrorKind::ConfigError,
                "Invalid client configuration",
                source: err
            )
        })?;

        let secret = SharedSecret::try_from(config.secret.expose_secret().as_str())?;
        Self::connect_with_timeout(&config.address, &secret, config.connect_timeout()).await
    }

    async fn connect_with_timeout(
        address: &str,
        secret: &SharedSecret,
        timeout: Duration,
    ) -> RendezvousResult<Self> {
        match tokio::time::timeout(timeout, Self::establish(address, secret)).await {
            Ok(client) => client,
            Err(_) => bail!(
                ErrorKind::IoError,
                "Timed out connecting to rendezvous server",
                format!("{address} did not complete the handshake within {timeout:?}")
            ),
        }
    }

    async fn establish(address: &str, secret: &SharedSecret) -> RendezvousResult<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let mut io = framed(stream);

        let hello = Request::Hello {
            secret: Credential::new(secret.to_base64()),
        };
        send(&mut io, &hello).await?;

        let parties = match recv::<_, Response>(&mut io).await? {
            Some(Response::Welcome { parties }) => parties,
            Some(Response::Error { code, message }) => return Err(code.into_error(message)),
            Some(other) => bail!(
                ErrorKind::ProtocolViolation,
                "Unexpected handshake response",
                format!("{other:?}")
            ),
            None => bail!(
                ErrorKind::ConnectionLost,
                "Rendezvous server closed the connection during the handshake"
            ),
        };

        info!(%address, parties, "connected to rendezvous server");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(io))),
            parties,
        })
    }

    /// Returns the server wide number of parties per barrier.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Returns a handle to the barrier for `[start, end]`, creating it on first use.
    ///
    /// Every caller asking for the same key, on any connection, reaches the
    /// same barrier.
    pub async fn get_barrier(
        &self,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> RendezvousResult<BarrierHandle> {
        let key = PartitionKey::new(start, end);

        match self.call(&Request::GetBarrier { key: key.clone() }).await? {
            Response::Handle { handle, parties } => {
                debug!(%key, %handle, "received barrier handle");
                Ok(BarrierHandle {
                    id: handle,
                    key,
                    parties,
                    client: self.clone(),
                })
            }
            other => Err(unexpected(other)),
        }
    }

    /// Sends `request` and returns its response, turning error responses into errors.
    ///
    /// The connection is closed for good if the request is cancelled or the
    /// socket fails, and later calls fail with [`ErrorKind::ConnectionLost`].
    async fn call(&self, request: &Request) -> RendezvousResult<Response> {
        let mut conn = self.conn.lock().await;

        let Some(mut io) = conn.take() else {
            bail!(
                ErrorKind::ConnectionLost,
                "Connection is closed after a cancelled or failed request"
            );
        };

        send(&mut io, request).await?;
        let response = recv::<_, Response>(&mut io).await?;
        if response.is_some() {
            *conn = Some(io);
        }

        match response {
            Some(Response::Error { code, message }) => Err(code.into_error(message)),
            Some(response) => Ok(response),
            None => bail!(
                ErrorKind::ConnectionLost,
                "Rendezvous server closed the connection",
                format!("while waiting for a `{}` response", request.name())
            ),
        }
    }
}

/// Session-scoped reference to one server side barrier.
#[derive(Debug, Clone)]
pub struct BarrierHandle {
    id: HandleId,
    key: PartitionKey,
    parties: usize,
    client: RendezvousClient,
}

impl BarrierHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Blocks until all parties have arrived and returns this party's arrival index.
    ///
    /// Uses the server's default timeout, which blocks forever unless the
    /// server was started with one. Fails with [`ErrorKind::BarrierBroken`]
    /// if the generation breaks and with [`ErrorKind::ConnectionLost`] if the
    /// connection drops; both are reported by
    /// [`RendezvousError::is_broken_barrier`](crate::error::RendezvousError::is_broken_barrier).
    pub async fn wait(&self) -> RendezvousResult<usize> {
        self.wait_inner(None).await
    }

    /// Like [`BarrierHandle::wait`], but breaks the barrier for every party
    /// if it does not release within `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> RendezvousResult<usize> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.wait_inner(Some(timeout_ms)).await
    }

    async fn wait_inner(&self, timeout_ms: Option<u64>) -> RendezvousResult<usize> {
        debug!(key = %self.key, handle = %self.id, ?timeout_ms, "waiting on barrier");

        let request = Request::Wait {
            handle: self.id,
            timeout_ms,
        };
        match self.client.call(&request).await? {
            Response::Arrived { index } => {
                debug!(key = %self.key, index, "barrier released");
                Ok(index)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Returns a snapshot of the barrier's counters.
    pub async fn status(&self) -> RendezvousResult<BarrierStatus> {
        match self.client.call(&Request::Status { handle: self.id }).await? {
            Response::Status {
                parties,
                n_waiting,
                broken,
                generation,
            } => Ok(BarrierStatus {
                parties,
                n_waiting,
                broken,
                generation,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the number of parties currently blocked on the barrier.
    pub async fn n_waiting(&self) -> RendezvousResult<usize> {
        Ok(self.status().await?.n_waiting)
    }

    /// Returns whether the barrier is currently broken.
    pub async fn is_broken(&self) -> RendezvousResult<bool> {
        Ok(self.status().await?.broken)
    }

    /// Breaks the barrier for every party until it is reset.
    pub async fn abort(&self) -> RendezvousResult<()> {
        self.expect_ok(Request::Abort { handle: self.id }).await
    }

    /// Returns the barrier to an empty, unbroken generation.
    pub async fn reset(&self) -> RendezvousResult<()> {
        self.expect_ok(Request::Reset { handle: self.id }).await
    }

    async fn expect_ok(&self, request: Request) -> RendezvousResult<()> {
        match self.client.call(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[track_caller]
fn unexpected(response: Response) -> crate::error::RendezvousError {
    rendezvous_error!(
        ErrorKind::ProtocolViolation,
        "Unexpected response from rendezvous server",
        format!("{response:?}")
    )
}
