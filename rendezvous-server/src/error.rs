use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use rendezvous::error::RendezvousError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for server binary operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Backtrace captured when a [`ServerError`] is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the server binary.
///
/// Wraps [`RendezvousError`] for service errors and adds variants for
/// startup concerns.
#[derive(Debug)]
pub enum ServerError {
    /// Error raised by the rendezvous service.
    Rendezvous(RendezvousError),
    /// Configuration or telemetry setup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl ServerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ServerError::Rendezvous(_) => "rendezvous error",
            ServerError::Config(_, _) => "configuration error",
            ServerError::Io(_, _) => "i/o error",
        }
    }

    /// Returns the backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        match self {
            ServerError::Rendezvous(err) => err.backtrace(),
            ServerError::Config(_, cb) => &cb.0,
            ServerError::Io(_, cb) => &cb.0,
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ServerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("rendezvous server failed\n");
        out.push_str(&format!("category: {}\n", self.category()));

        // The rendezvous error renders its own detail and backtrace.
        if let ServerError::Rendezvous(err) = self {
            out.push_str(&format!(
                "error: [{:?}] {}\n",
                err.kind(),
                err.description()
            ));
            if let Some(detail) = err.detail() {
                out.push_str(&format!("detail: {detail}\n"));
            }
        } else {
            out.push_str(&format!("error: {self}\n"));
        }

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace() {
            out.push_str("backtrace:\n");
            out.push_str(&self.backtrace().to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Rendezvous(err) => write!(f, "{err}"),
            ServerError::Config(source, _) => write!(f, "configuration error: {source}"),
            ServerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerError::Rendezvous(err) => err.source(),
            ServerError::Config(source, _) => Some(source.as_ref()),
            ServerError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<RendezvousError> for ServerError {
    fn from(err: RendezvousError) -> Self {
        ServerError::Rendezvous(err)
    }
}

#[cfg(test)]
mod tests {
    use rendezvous::error::ErrorKind;
    use rendezvous::rendezvous_error;

    use super::*;

    #[test]
    fn report_names_category_and_detail() {
        let err = ServerError::from(rendezvous_error!(
            ErrorKind::IoError,
            "I/O operation failed",
            "address in use"
        ));

        let report = err.render_report();
        assert!(report.starts_with("rendezvous server failed\n"));
        assert!(report.contains("category: rendezvous error\n"));
        assert!(report.contains("error: [IoError] I/O operation failed\n"));
        assert!(report.contains("detail: address in use\n"));
    }

    #[test]
    fn report_lists_causes() {
        let io = std::io::Error::other("disk on fire");
        let err = ServerError::config(io);

        let report = err.render_report();
        assert!(report.contains("error: configuration error: disk on fire\n"));
        assert!(report.contains("cause 1: disk on fire\n"));
    }
}
