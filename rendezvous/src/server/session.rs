//! One authenticated connection.
//!
//! A session answers requests strictly in order. While a `wait` is
//! outstanding the session keeps reading from the socket: a closed socket
//! drops the wait, which applies the barrier's abandon policy, and frames
//! pipelined behind the wait are queued and answered once it completes.
//! At most [`MAX_PIPELINED_FRAMES`] frames are queued; one more is a
//! protocol violation that closes the connection.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::barrier::Barrier;
use crate::error::{ErrorKind, RendezvousResult};
use crate::metrics::{
    ERROR_KIND_LABEL, RENDEZVOUS_AUTHENTICATION_FAILURES_TOTAL, RENDEZVOUS_CONNECTION_ERRORS_TOTAL,
};
use crate::protocol::codec::{FramedIo, decode, framed, recv, send};
use crate::protocol::{ErrorCode, Request, Response};
use crate::server::RendezvousService;
use crate::types::{HandleId, PartitionKey};
use crate::{bail, rendezvous_error};

/// Number of frames a peer may pipeline behind an outstanding `wait`.
const MAX_PIPELINED_FRAMES: usize = 16;

/// Serves one accepted connection to completion and logs how it ended.
pub(super) async fn serve(stream: TcpStream, peer: SocketAddr, service: Arc<RendezvousService>) {
    debug!(%peer, "connection accepted");

    let result = Session::new(framed(stream), service).run().await;

    let Err(err) = result else {
        debug!(%peer, "connection closed");
        return;
    };

    counter!(
        RENDEZVOUS_CONNECTION_ERRORS_TOTAL,
        ERROR_KIND_LABEL => format!("{:?}", err.kind())
    )
    .increment(1);

    match err.kind() {
        ErrorKind::ConnectionLost => info!(%peer, detail = ?err.detail(), "connection lost"),
        ErrorKind::AuthenticationFailed => {
            warn!(%peer, reason = ?err.detail(), "connection rejected")
        }
        ErrorKind::ProtocolViolation => {
            warn!(%peer, detail = ?err.detail(), "connection closed after protocol violation")
        }
        _ => error!(%peer, error = %err, "connection failed"),
    }
}

/// A partition key bound to a session handle.
#[derive(Debug)]
struct Binding {
    key: PartitionKey,
    barrier: Arc<Barrier>,
}

struct Session<T> {
    io: FramedIo<T>,
    service: Arc<RendezvousService>,
    handles: HashMap<HandleId, Binding>,
    next_handle: u64,
    backlog: VecDeque<BytesMut>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(io: FramedIo<T>, service: Arc<RendezvousService>) -> Self {
        Self {
            io,
            service,
            handles: HashMap::new(),
            next_handle: 1,
            backlog: VecDeque::new(),
        }
    }

    async fn run(mut self) -> RendezvousResult<()> {
        if !self.handshake().await? {
            return Ok(());
        }

        while let Some(frame) = self.next_frame().await? {
            let request = match decode::<Request>(&frame) {
                Ok(request) => request,
                Err(err) => {
                    let err = rendezvous_error!(
                        ErrorKind::ProtocolViolation,
                        "Malformed request frame",
                        err.detail().unwrap_or_default()
                    );
                    send(&mut self.io, &Response::from_error(&err)).await?;
                    return Err(err);
                }
            };

            let response = self.dispatch(request).await?;
            send(&mut self.io, &response).await?;
        }

        Ok(())
    }

    /// Authenticates the connection.
    ///
    /// Returns `Ok(false)` when the peer closed the connection without sending
    /// anything, and an [`ErrorKind::AuthenticationFailed`] error after
    /// answering any first frame that is not a `hello` with the right secret.
    async fn handshake(&mut self) -> RendezvousResult<bool> {
        let timeout = self.service.config().handshake_timeout();
        let first = tokio::time::timeout(timeout, recv::<_, Request>(&mut self.io)).await;

        let reason = match first {
            Ok(Ok(None)) => {
                debug!("connection closed before handshake");
                return Ok(false);
            }
            Ok(Ok(Some(Request::Hello { secret }))) => {
                if self.service.secret().verify(secret.as_str()) {
                    let parties = self.service.config().nprocs;
                    send(&mut self.io, &Response::Welcome { parties }).await?;
                    debug!("connection authenticated");

                    return Ok(true);
                }

                "wrong shared secret".to_string()
            }
            Ok(Ok(Some(request))) => {
                format!("first request was `{}` instead of `hello`", request.name())
            }
            Ok(Err(err)) if err.kind() == ErrorKind::ConnectionLost => return Err(err),
            Ok(Err(err)) => format!("unreadable handshake frame: {}", err.description()),
            Err(_) => format!("no hello within {}ms", timeout.as_millis()),
        };

        counter!(RENDEZVOUS_AUTHENTICATION_FAILURES_TOTAL).increment(1);

        let rejection = Response::Error {
            code: ErrorCode::AuthenticationFailed,
            message: "authentication failed".to_string(),
        };
        // The peer may already be gone; the rejection is reported either way.
        let _ = send(&mut self.io, &rejection).await;

        bail!(
            ErrorKind::AuthenticationFailed,
            "Connection failed authentication",
            reason
        );
    }

    async fn next_frame(&mut self) -> RendezvousResult<Option<BytesMut>> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(Some(frame));
        }

        match self.io.next().await {
            Some(frame) => Ok(Some(frame?)),
            None => Ok(None),
        }
    }

    /// Answers one request.
    ///
    /// Request level failures become error responses; only failures of the
    /// connection itself are returned as errors.
    async fn dispatch(&mut self, request: Request) -> RendezvousResult<Response> {
        let outcome = match request {
            Request::Hello { .. } => Err(rendezvous_error!(
                ErrorKind::ProtocolViolation,
                "Connection is already authenticated"
            )),
            Request::GetBarrier { key } => Ok(self.get_barrier(key)),
            Request::Wait { handle, timeout_ms } => return self.wait(handle, timeout_ms).await,
            Request::Status { handle } => self
                .barrier(handle)
                .map(|barrier| Response::from(barrier.status())),
            Request::Abort { handle } => self.barrier(handle).map(|barrier| {
                barrier.abort();
                Response::Ok
            }),
            Request::Reset { handle } => self.barrier(handle).map(|barrier| {
                barrier.reset();
                Response::Ok
            }),
        };

        Ok(outcome.unwrap_or_else(|err| Response::from_error(&err)))
    }

    fn get_barrier(&mut self, key: PartitionKey) -> Response {
        info!(%key, "fetching barrier");

        let barrier = self.service.registry().get_or_create(&key);
        let parties = barrier.parties();

        let handle = HandleId(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, Binding { key, barrier });

        Response::Handle { handle, parties }
    }

    async fn wait(
        &mut self,
        handle: HandleId,
        timeout_ms: Option<u64>,
    ) -> RendezvousResult<Response> {
        let barrier = match self.barrier(handle) {
            Ok(barrier) => barrier,
            Err(err) => return Ok(Response::from_error(&err)),
        };
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.service.config().wait_timeout());

        if let Some(binding) = self.handles.get(&handle) {
            debug!(key = %binding.key, %handle, ?timeout, "waiting on barrier");
        }

        let wait = barrier.wait(timeout);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                result = &mut wait => {
                    return Ok(match result {
                        Ok(index) => Response::Arrived { index },
                        Err(err) => Response::from_error(&err),
                    });
                }
                frame = self.io.next() => match frame {
                    Some(Ok(frame)) => {
                        if self.backlog.len() >= MAX_PIPELINED_FRAMES {
                            let err = rendezvous_error!(
                                ErrorKind::ProtocolViolation,
                                "Too many requests pipelined behind a wait",
                                format!("more than {MAX_PIPELINED_FRAMES} frames behind handle {handle}")
                            );
                            send(&mut self.io, &Response::from_error(&err)).await?;
                            return Err(err);
                        }
                        self.backlog.push_back(frame);
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => bail!(
                        ErrorKind::ConnectionLost,
                        "Connection closed while waiting on barrier",
                        format!("handle {handle}")
                    ),
                },
            }
        }
    }

    fn barrier(&self, handle: HandleId) -> RendezvousResult<Arc<Barrier>> {
        match self.handles.get(&handle) {
            Some(binding) => Ok(binding.barrier.clone()),
            None => bail!(
                ErrorKind::UnknownHandle,
                "Unknown barrier handle",
                format!("handle {handle} was not issued on this connection")
            ),
        }
    }
}
