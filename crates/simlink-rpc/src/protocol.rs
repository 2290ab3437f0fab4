//! Hub handshake protocol.
//!
//! A remote controller opens a TCP connection to the hub and sends exactly
//! one command line, prefixed with the handshake string:
//!
//! ```text
//! <remote> SimLink RCH: CONNECT Owen
//! <hub>    OK
//! ```
//!
//! From then on the connection belongs to the endpoint named `Owen` and
//! carries framed documents (see [`DOCUMENT_HEADER`] / [`DOCUMENT_FOOTER`]).
//! Any failure is answered with a single `ERROR` line and the connection is
//! dropped; the reason only appears in the daemon log.

use std::fmt;

/// Default prefix every command line must start with.
pub const DEFAULT_HANDSHAKE: &str = "SimLink RCH: ";

/// Default TCP port of the hub.
pub const DEFAULT_PORT: u16 = 7770;

/// Acknowledgement line sent after a successful dispatch.
pub const ACK_LINE: &str = "OK";

/// Reply line for every dispatch failure.
pub const ERROR_LINE: &str = "ERROR";

/// Line that opens a framed document.
pub const DOCUMENT_HEADER: &str = "XML_DOCUMENT_BEGIN";

/// Marker that closes a framed document. It may appear anywhere after the
/// document content, the trailing line terminator is optional.
pub const DOCUMENT_FOOTER: &str = "XML_DOCUMENT_END";

const COMMAND_CONNECT: &str = "CONNECT";

/// A parsed hub command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    /// Route this connection to the first endpoint whose name matches the
    /// exact name or `?`/`*` glob pattern.
    Connect { pattern: String },
}

impl HubCommand {
    /// Render the command as the line a remote sends, including the handshake.
    #[must_use]
    pub fn to_line(&self, handshake: &str) -> String {
        match self {
            Self::Connect { pattern } => format!("{handshake}{COMMAND_CONNECT} {pattern}"),
        }
    }
}

/// Reasons a command line is refused before any endpoint lookup happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid handshake string: {0}")]
    HandshakeMismatch(String),

    #[error("Invalid command: {0}")]
    UnknownCommand(String),

    #[error("Missing target pattern for CONNECT")]
    MissingPattern,
}

/// Parse a `<handshake><COMMAND> <args>` line.
///
/// The handshake must match byte for byte. Command keywords are case
/// sensitive; surrounding whitespace of the pattern is ignored.
///
/// # Errors
///
/// Returns a [`CommandError`] describing why the line was refused.
pub fn parse_command_line(line: &str, handshake: &str) -> Result<HubCommand, CommandError> {
    let Some(command) = line.strip_prefix(handshake) else {
        return Err(CommandError::HandshakeMismatch(line.to_string()));
    };

    let (keyword, args) = match command.split_once(' ') {
        Some((keyword, args)) => (keyword, args),
        None => (command, ""),
    };

    match keyword {
        COMMAND_CONNECT => {
            let pattern = args.trim();
            if pattern.is_empty() {
                return Err(CommandError::MissingPattern);
            }
            Ok(HubCommand::Connect {
                pattern: pattern.to_string(),
            })
        }
        _ => Err(CommandError::UnknownCommand(command.to_string())),
    }
}

/// Reply line sent by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubReply {
    Ack,
    Error,
}

impl HubReply {
    #[must_use]
    pub fn as_line(self) -> &'static str {
        match self {
            Self::Ack => ACK_LINE,
            Self::Error => ERROR_LINE,
        }
    }

    /// Interpret a reply line received by a remote. Unknown lines yield `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            ACK_LINE => Some(Self::Ack),
            ERROR_LINE => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for HubReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_line())
    }
}
