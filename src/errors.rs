//! Error types shared across the runtime.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared runtime result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Runtime error enumeration covering all failure modes.
///
/// None of these are fatal to the process: the dispatcher converts every
/// variant that reaches it into a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Stream or file-system I/O failure.
    Io(String),
    /// Request params that do not match the method's schema.
    Protocol(String),
    /// The script unit raised an error.
    Script(String),
    /// The inventory service reported a failure or could not be reached.
    Remote(String),
    /// The execution's cancellation token fired.
    Cancelled,
    /// The execution exceeded its time bound.
    Timeout(Duration),
    /// Another execution already occupies the active slot.
    Busy(i64),
}

impl AppError {
    /// Message surfaced to JSON-RPC callers.
    ///
    /// Script and remote failures carry the underlying message verbatim so
    /// callers see exactly what the script or service reported.
    #[must_use]
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Script(msg) | Self::Remote(msg) => msg.clone(),
            Self::Protocol(msg) => format!("Invalid params: {msg}"),
            Self::Cancelled => "Script execution cancelled".to_owned(),
            Self::Timeout(_) => "Script execution timed out".to_owned(),
            other => other.to_string(),
        }
    }

    /// Prefix a script error with the line it was raised on.
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Self::Script(msg) => Self::Script(format!("line {line}: {msg}")),
            other => other,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Script(msg) => write!(f, "script: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Timeout(limit) => write!(f, "timeout: exceeded {}ms", limit.as_millis()),
            Self::Busy(id) => write!(f, "busy: execution {id} is still running"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
