//! Messages exchanged between workers and the server.
//!
//! Every message is one JSON object tagged by `"type"`, carried in a
//! length-delimited frame (see [`codec`]). A session starts with exactly one
//! [`Request::Hello`]; every later request gets exactly one [`Response`], in
//! order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::barrier::BarrierStatus;
use crate::error::{ErrorKind, RendezvousError};
use crate::rendezvous_error;
use crate::types::{HandleId, PartitionKey};

pub mod codec;

/// Base64 secret presented in [`Request::Hello`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Requests sent by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Authenticates the connection. Must be the first frame.
    Hello { secret: Credential },
    /// Resolves a partition key to a session handle, creating the barrier on first use.
    GetBarrier { key: PartitionKey },
    /// Blocks until the barrier behind `handle` releases or breaks.
    Wait {
        handle: HandleId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Status { handle: HandleId },
    Abort { handle: HandleId },
    Reset { handle: HandleId },
}

impl Request {
    /// Returns the name of the request as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::GetBarrier { .. } => "get_barrier",
            Request::Wait { .. } => "wait",
            Request::Status { .. } => "status",
            Request::Abort { .. } => "abort",
            Request::Reset { .. } => "reset",
        }
    }
}

/// Responses sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The connection is authenticated; `parties` is the server wide party count.
    Welcome { parties: usize },
    Handle { handle: HandleId, parties: usize },
    /// The barrier released; `index` is the caller's arrival index.
    Arrived { index: usize },
    Status {
        parties: usize,
        n_waiting: usize,
        broken: bool,
        generation: u64,
    },
    Ok,
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Builds the error response sent for `err`.
    pub fn from_error(err: &RendezvousError) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {detail}", err.description()),
            None => err.description().to_owned(),
        };

        Response::Error {
            code: ErrorCode::from(err.kind()),
            message,
        }
    }
}

impl From<BarrierStatus> for Response {
    fn from(status: BarrierStatus) -> Self {
        Response::Status {
            parties: status.parties,
            n_waiting: status.n_waiting,
            broken: status.broken,
            generation: status.generation,
        }
    }
}

/// Error categories visible to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    BarrierBroken,
    UnknownHandle,
    ProtocolViolation,
    Internal,
}

impl ErrorCode {
    /// Returns the [`ErrorKind`] a client reports for this code.
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            ErrorCode::BarrierBroken => ErrorKind::BarrierBroken,
            ErrorCode::UnknownHandle => ErrorKind::UnknownHandle,
            ErrorCode::ProtocolViolation => ErrorKind::ProtocolViolation,
            ErrorCode::Internal => ErrorKind::Unknown,
        }
    }

    /// Converts a received error response into a [`RendezvousError`].
    #[track_caller]
    pub fn into_error(self, message: String) -> RendezvousError {
        rendezvous_error!(self.kind(), "Rendezvous server returned an error", message)
    }
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::AuthenticationFailed | ErrorKind::InvalidSecret => {
                ErrorCode::AuthenticationFailed
            }
            ErrorKind::BarrierBroken => ErrorCode::BarrierBroken,
            ErrorKind::UnknownHandle => ErrorCode::UnknownHandle,
            ErrorKind::ProtocolViolation | ErrorKind::DeserializationError => {
                ErrorCode::ProtocolViolation
            }
            _ => ErrorCode::Internal,
        }
    }
}
