//! Error types for the driver.

use thiserror::Error;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket, handshake or TLS failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Unexpected packet, malformed block or other wire-level violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Per-frame content checksum did not match.
    #[error("checksum mismatch: expected {expected:#034x}, got {actual:#034x}")]
    Checksum { expected: u128, actual: u128 },

    /// A connect/send/receive deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Another query is already in flight on this connection.
    #[error("connection is busy")]
    Busy,

    /// The connection has been closed; no further operations are legal.
    #[error("connection is closed")]
    Closed,

    /// The cursor has been closed.
    #[error("cursor is closed")]
    CursorClosed,

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool misuse (bad sizes, releasing a foreign connection).
    #[error("pool error: {0}")]
    Pool(String),

    /// DSN string could not be parsed.
    #[error("invalid DSN: {0}")]
    Dsn(String),

    /// Caller-side argument error (wrong row arity, bad option value).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A value does not fit the column it is written into.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: String,
    },

    /// The server sent a column type this driver does not know.
    #[error("unknown column type: {0}")]
    UnknownType(String),

    /// Exception packet reported by the server.
    #[error(transparent)]
    Server(#[from] ServerException),

    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed in the middle of a field.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

impl Error {
    /// Whether the connection that produced this error must be discarded.
    ///
    /// Server-reported exceptions leave the connection usable after the
    /// query is drained; wire-level, checksum and timeout errors do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Timeout(_)
                | Error::Checksum { .. }
                | Error::Protocol(_)
                | Error::UnexpectedEof
                | Error::Connection(_)
        )
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An exception reported by the server, preserved code-for-code.
#[derive(Debug, Clone, Error)]
#[error("Code: {code}. {name}: {message}")]
pub struct ServerException {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<ServerException>>,
}

/// DB-API style categorization of server exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Operational,
    Data,
    Integrity,
    Internal,
    Programming,
    NotSupported,
}

impl ServerException {
    /// Classify this exception by its server error code.
    pub fn category(&self) -> ErrorCategory {
        match self.code {
            // UNSUPPORTED_METHOD, UNSUPPORTED_PARAMETER, NOT_IMPLEMENTED
            1 | 2 | 48 => ErrorCategory::NotSupported,
            // CANNOT_PARSE_*, TYPE_MISMATCH, ARGUMENT_OUT_OF_BOUND
            6 | 38 | 41 | 53 | 69 | 72 | 129 => ErrorCategory::Data,
            // NO_SUCH_COLUMN, UNKNOWN_IDENTIFIER, UNKNOWN_TABLE, UNKNOWN_DATABASE,
            // SYNTAX_ERROR, UNKNOWN_FUNCTION
            16 | 46 | 47 | 60 | 62 | 81 | 82 => ErrorCategory::Programming,
            // UNKNOWN_STATUS_OF_INSERT
            319 => ErrorCategory::Integrity,
            // LOGICAL_ERROR
            49 | 1000 => ErrorCategory::Internal,
            _ => ErrorCategory::Operational,
        }
    }
}
