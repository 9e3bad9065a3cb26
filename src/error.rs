//! Error types for pg-sandbox.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for wire-level operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice fields.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Wire-level error raised by the PostgreSQL client.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Malformed message or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Operation did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid usage (e.g., malformed connection URL)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Returns true if the server rejected the request (as opposed to a transport failure).
    pub fn is_server(&self) -> bool {
        matches!(self, Error::Server(_))
    }
}

impl<Src: fmt::Debug, Dst: fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

/// Failure of a provisioner operation (create, resolve endpoint, terminate).
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The provisioner's backing tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing tool ran but reported a failure.
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The instance did not become ready in time.
    #[error("instance {id} not ready after {timeout:?}")]
    NotReady { id: String, timeout: Duration },

    /// The instance's connection endpoint could not be resolved.
    #[error("endpoint unavailable: {0}")]
    Endpoint(String),

    /// Any other provisioner failure.
    #[error("{0}")]
    Other(String),
}

/// Returned by [`Pool::borrow`](crate::pool::Pool::borrow) once the pool has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("instance pool is closed")]
pub struct PoolClosed;

/// Step of query execution at which an [`ExecError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStage {
    /// No instance could be borrowed (the pool is shut down).
    Unavailable,
    /// The borrowed instance's endpoint could not be resolved.
    Endpoint,
    /// The instance was unreachable or rejected the session.
    Connection,
    /// The query failed to parse, plan or start executing.
    Statement,
    /// The result set's column descriptions could not be read.
    Metadata,
    /// A row could not be read or converted to text.
    Read,
}

impl ExecStage {
    /// Stable lowercase name, used in API error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStage::Unavailable => "unavailable",
            ExecStage::Endpoint => "endpoint",
            ExecStage::Connection => "connection",
            ExecStage::Statement => "statement",
            ExecStage::Metadata => "metadata",
            ExecStage::Read => "read",
        }
    }

    fn context(self) -> &'static str {
        match self {
            ExecStage::Unavailable => "borrowing instance",
            ExecStage::Endpoint => "getting connection endpoint",
            ExecStage::Connection => "connecting database",
            ExecStage::Statement => "preparing statement",
            ExecStage::Metadata => "getting result set columns",
            ExecStage::Read => "reading rows",
        }
    }
}

impl fmt::Display for ExecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced to the caller of `execute_query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
    stage: ExecStage,
    message: String,
    code: Option<String>,
}

impl ExecError {
    pub fn new(stage: ExecStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            code: None,
        }
    }

    /// Build from a wire error, keeping the SQLSTATE when the server supplied one.
    pub fn from_wire(stage: ExecStage, err: &Error) -> Self {
        Self {
            stage,
            message: err.to_string(),
            code: err.sqlstate().map(str::to_owned),
        }
    }

    pub fn stage(&self) -> ExecStage {
        self.stage
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// SQLSTATE reported by the server, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage.context(), self.message)?;
        if let Some(code) = &self.code {
            write!(f, ", PG error code: {}", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecError {}

impl From<PoolClosed> for ExecError {
    fn from(err: PoolClosed) -> Self {
        ExecError::new(ExecStage::Unavailable, err.to_string())
    }
}
