//! The [`Error`] and [`Result`] types used throughout the core, plus the result-code
//! taxonomy the wire protocol reports.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// The result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by the async core.
///
/// Cheap to clone: the boxed [`ErrorKind`] never holds a socket, buffer, or other
/// non-`Clone` resource, only the data needed to report and log the failure.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Whether the core is permitted to retry a command that failed with this error.
    /// Per §7, only network, invalid-node, and timeout categories are retry-eligible;
    /// an application-level result code is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Network { .. } | ErrorKind::InvalidNode { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(*self.kind, ErrorKind::Timeout { .. })
    }

    pub fn is_in_doubt(&self) -> bool {
        matches!(*self.kind, ErrorKind::InDoubt { .. })
    }

    /// Whether this is a non-zero application result code rather than a
    /// network/timeout/admission failure. A fan-out driver treats this as a
    /// row-level outcome (§4.9's `setRowError`) rather than a hard child failure.
    pub fn is_server_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Server { .. })
    }

    pub fn network(address: SocketAddr, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network {
            address,
            message: message.into(),
        })
    }

    pub fn connection_closed(address: SocketAddr) -> Self {
        Self::new(ErrorKind::Network {
            address,
            message: "closed".to_string(),
        })
    }

    pub fn timeout(elapsed: Duration, deadline: Duration) -> Self {
        Self::new(ErrorKind::Timeout { elapsed, deadline })
    }

    pub fn invalid_node(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidNode {
            reason: reason.into(),
        })
    }

    pub fn rejected(in_flight: u32, limit: u32) -> Self {
        Self::new(ErrorKind::Rejected { in_flight, limit })
    }

    pub fn no_more_connections(address: SocketAddr) -> Self {
        Self::new(ErrorKind::NoMoreConnections { address })
    }

    pub fn server(code: ResultCode) -> Self {
        Self::new(ErrorKind::Server { code })
    }

    pub fn in_doubt(source: Box<Error>) -> Self {
        Self::new(ErrorKind::InDoubt { source })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument {
            message: message.into(),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// The taxonomy of failures the core can surface, one variant family per row of §7.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Connect refused, send/recv failure, or closed-mid-read. Retryable; decrements
    /// node health.
    #[error("network error talking to {address}: {message}")]
    Network {
        address: SocketAddr,
        message: String,
    },

    /// The command's deadline was exceeded. Terminal; the connection is closed or
    /// handed to the recovery drainer.
    #[error("command timed out after {elapsed:?} (deadline {deadline:?})")]
    Timeout {
        elapsed: Duration,
        deadline: Duration,
    },

    /// No node could be resolved for the partition/replica at attempt time. Retryable.
    #[error("no node available: {reason}")]
    InvalidNode { reason: String },

    /// A non-zero server result code whose semantics the caller must see. Terminal.
    #[error("server returned {code:?}")]
    Server { code: ResultCode },

    /// Admission refused the command outright. Terminal, never retried.
    #[error("command rejected: {in_flight} in flight exceeds limit {limit}")]
    Rejected { in_flight: u32, limit: u32 },

    /// The node's connection pool is at `asyncMaxConnsPerNode` and had no idle
    /// connection to offer.
    #[error("no more connections available for {address}")]
    NoMoreConnections { address: SocketAddr },

    /// A write was sent but no decisive response was received; the server may or may
    /// not have applied it.
    #[error("write is in doubt: {source}")]
    InDoubt { source: Box<Error> },

    /// Malformed or unparseable wire data.
    #[error("invalid wire response: {message}")]
    InvalidResponse { message: String },

    /// A programmer error: bad configuration or call-site argument.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An invariant violation internal to the core.
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::sync::Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io(std::sync::Arc::new(e)))
    }
}

/// Server result codes the core inspects. Any other non-zero code round-trips as
/// [`ResultCode::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    KeyNotFoundError,
    FilteredOut,
    NoMoreConnections,
    UdfBadResponse,
    BinExistsError,
    MrtAborted,
    TxnFailed,
    SecurityNotEnabled,
    Other(u8),
}

impl ResultCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ResultCode::Ok,
            2 => ResultCode::KeyNotFoundError,
            27 => ResultCode::FilteredOut,
            21 => ResultCode::NoMoreConnections,
            100 => ResultCode::UdfBadResponse,
            5 => ResultCode::BinExistsError,
            120 => ResultCode::MrtAborted,
            121 => ResultCode::TxnFailed,
            37 => ResultCode::SecurityNotEnabled,
            other => ResultCode::Other(other),
        }
    }

    /// Whether this code is an application-level outcome the core never retries.
    pub fn is_application_error(&self) -> bool {
        !matches!(self, ResultCode::Ok)
    }

    /// The subset of non-OK codes that still permit returning the connection to the
    /// pool (the "keep-connection" set referenced in §4.7).
    pub fn keeps_connection(&self) -> bool {
        matches!(
            self,
            ResultCode::KeyNotFoundError | ResultCode::FilteredOut | ResultCode::UdfBadResponse
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_errors_are_not_retryable() {
        let err: Error = ErrorKind::Server {
            code: ResultCode::KeyNotFoundError,
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_errors_are_retryable() {
        let err = Error::network("127.0.0.1:3000".parse().unwrap(), "connection refused");
        assert!(err.is_retryable());
        assert!(!err.is_timeout());
    }

    #[test]
    fn result_code_round_trip() {
        assert_eq!(ResultCode::from_u8(2), ResultCode::KeyNotFoundError);
        assert!(matches!(ResultCode::from_u8(250), ResultCode::Other(250)));
    }

    #[test]
    fn keep_connection_set_matches_spec() {
        assert!(ResultCode::KeyNotFoundError.keeps_connection());
        assert!(!ResultCode::MrtAborted.keeps_connection());
    }
}
