//! Error types for the simlink daemon.

use simlink_rpc::CommandError;

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] simlink_core::Error),

    /// Collaborator registration failed
    #[error("Registration error: {0}")]
    Registration(#[from] simlink_core::RegistrationError),

    /// The listening socket could not be created
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Why the hub refused or lost a pending connection.
///
/// Every variant is resolved by dropping the connection; the remote only
/// ever sees `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Invalid handshake string: {0}")]
    HandshakeMismatch(String),

    #[error("Invalid command: {0}")]
    UnknownCommand(String),

    #[error("Missing target for CONNECT")]
    MissingTarget,

    #[error("No endpoint matches '{0}'")]
    TargetNotFound(String),

    #[error("'{0}' is not remote controllable")]
    TargetNotConnectable(String),

    #[error("Invalid target pattern: {0}")]
    InvalidPattern(String),

    #[error("Endpoint '{0}' is busy")]
    TargetBusy(String),

    #[error("Failed to send acknowledgement: {0}")]
    AcknowledgementSendFailure(String),

    #[error("Connection lost before the handshake")]
    ReadFailure,
}

impl From<CommandError> for HubError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::HandshakeMismatch(line) => Self::HandshakeMismatch(line),
            CommandError::UnknownCommand(command) => Self::UnknownCommand(command),
            CommandError::MissingPattern => Self::MissingTarget,
        }
    }
}

impl From<simlink_core::ResolveError> for HubError {
    fn from(err: simlink_core::ResolveError) -> Self {
        match err {
            simlink_core::ResolveError::NotFound(pattern) => Self::TargetNotFound(pattern),
            simlink_core::ResolveError::NotConnectable(name) => Self::TargetNotConnectable(name),
            simlink_core::ResolveError::InvalidPattern { pattern, reason } => {
                Self::InvalidPattern(format!("{pattern}: {reason}"))
            }
        }
    }
}
