//! Transport-level error type.

use std::fmt;

/// Boxed error returned by handlers and storage collaborators.
///
/// Anything that converts into it can be propagated with `?` from a handler.
/// A boxed [`HandlingError`](crate::HandlingError) keeps its status; every
/// other error is wrapped with `500 Internal Server Error`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by rxhttp's fallible server operations.
///
/// Request-level failures are [`HandlingError`](crate::HandlingError)s and
/// flow through the pipeline as values. This type surfaces the faults that
/// happen before any [`Context`](crate::Context) exists: binding the
/// listening socket, or the accept loop dying.
#[derive(Debug)]
pub enum Error {
    /// The listening socket could not be bound.
    Bind { addr: String, source: std::io::Error },
    /// Any other I/O failure on the listener.
    Io(std::io::Error),
    /// The accept loop task panicked or was cancelled.
    Task(tokio::task::JoinError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "cannot listen on {addr}: {source}"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Task(e) => write!(f, "accept loop: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Task(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e)
    }
}
