//! Error types and result definitions for rendezvous operations.
//!
//! Every fallible operation in the crate returns [`RendezvousError`], which
//! carries an [`ErrorKind`] for programmatic handling plus a static
//! description, optional dynamic detail, an optional source, the callsite and
//! a captured backtrace for diagnostics.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for rendezvous operations.
pub type RendezvousResult<T> = Result<T, RendezvousError>;

/// Categories of failures.
///
/// The kinds map one to one onto the failure modes of the service: each is
/// scoped to a single connection or a single key, never to the whole process.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Security & Authentication Errors
    /// The peer presented a wrong or no shared secret.
    AuthenticationFailed,
    /// A shared secret could not be decoded.
    InvalidSecret,

    // Barrier Errors
    /// The barrier generation the caller belongs to was broken.
    BarrierBroken,
    /// Two barrier instances were observed for one key.
    KeyCreationRace,

    // Connection & Protocol Errors
    /// The peer went away while a request was outstanding.
    ConnectionLost,
    /// The peer sent a frame that is not valid at this point of the session.
    ProtocolViolation,
    /// A request referenced a handle this session never issued.
    UnknownHandle,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // Configuration Errors
    ConfigError,

    // Unknown / Uncategorized
    Unknown,
}

/// Payload stored for every [`RendezvousError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for rendezvous operations.
#[derive(Debug, Clone)]
pub struct RendezvousError {
    payload: ErrorPayload,
}

impl RendezvousError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the callsite at which this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Returns whether the caller's barrier generation failed, either because
    /// it was broken server side or because the connection carrying the wait
    /// was lost.
    pub fn is_broken_barrier(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BarrierBroken | ErrorKind::ConnectionLost
        )
    }

    /// Attaches an originating error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`RendezvousError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        RendezvousError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }
}

impl PartialEq for RendezvousError {
    fn eq(&self, other: &RendezvousError) -> bool {
        self.kind() == other.kind()
    }
}

impl fmt::Display for RendezvousError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            payload.location.file(),
            payload.location.line(),
            payload.location.column()
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        let backtrace = payload.backtrace.to_string();
        if !backtrace.trim().is_empty() {
            write!(f, "\n  Backtrace:")?;
            for line in backtrace.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for RendezvousError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Creates a [`RendezvousError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for RendezvousError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> RendezvousError {
        RendezvousError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`RendezvousError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for RendezvousError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> RendezvousError {
        RendezvousError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`RendezvousError`].
///
/// Errors that mean the peer went away map to [`ErrorKind::ConnectionLost`],
/// everything else to [`ErrorKind::IoError`].
impl From<std::io::Error> for RendezvousError {
    #[track_caller]
    fn from(err: std::io::Error) -> RendezvousError {
        use std::io::ErrorKind as IoKind;

        let (kind, description) = match err.kind() {
            IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::BrokenPipe
            | IoKind::UnexpectedEof => (ErrorKind::ConnectionLost, "connection lost"),
            _ => (ErrorKind::IoError, "I/O operation failed"),
        };

        let detail = err.to_string();
        RendezvousError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_json::Error`] to [`RendezvousError`].
///
/// Maps to [`ErrorKind::SerializationError`] for serialization failures and
/// [`ErrorKind::DeserializationError`] for malformed input.
impl From<serde_json::Error> for RendezvousError {
    #[track_caller]
    fn from(err: serde_json::Error) -> RendezvousError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        let detail = err.to_string();
        RendezvousError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
