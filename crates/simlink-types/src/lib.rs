//! Shared types for SimLink components.
//!
//! This crate provides the small vocabulary used across simlink-rpc,
//! simlink-core, simlink-daemon and simlink-cli. All types are serializable
//! so they can appear in configuration files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of an endpoint's communication schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleOp {
    /// Block until exactly one inbound document arrives and fan it out to
    /// the registered collaborators.
    Receive,

    /// Collect every collaborator's outbound subtree and transmit one document.
    Send,

    /// Hand control back to the host so collaborators can tick. Only legal
    /// in the pre-update phase.
    YieldToUsers,

    /// End of the communication work for this host step.
    Yield,
}

impl ScheduleOp {
    /// Whether this operation returns control to the host.
    #[must_use]
    pub fn is_yield_class(self) -> bool {
        matches!(self, Self::Yield | Self::YieldToUsers)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Send => "send",
            Self::YieldToUsers => "yieldToUsers",
            Self::Yield => "yield",
        }
    }
}

impl fmt::Display for ScheduleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown schedule operation name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScheduleOp(pub String);

impl fmt::Display for UnknownScheduleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown schedule operation: {}", self.0)
    }
}

impl std::error::Error for UnknownScheduleOp {}

impl FromStr for ScheduleOp {
    type Err = UnknownScheduleOp;

    /// Accepts the config spelling as well as lowercase and snake case variants.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "receive" | "recv" => Ok(Self::Receive),
            "send" => Ok(Self::Send),
            "yieldtousers" => Ok(Self::YieldToUsers),
            "yield" => Ok(Self::Yield),
            _ => Err(UnknownScheduleOp(s.to_string())),
        }
    }
}

/// Which half of a host step is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Before the endpoint's collaborators tick.
    PreUpdate,
    /// After all collaborators have ticked.
    PostUpdate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreUpdate => f.write_str("pre-update"),
            Self::PostUpdate => f.write_str("post-update"),
        }
    }
}

/// Check whether a collaborator tree name can be used as a document key.
///
/// Tree names must be non-empty and must not contain whitespace or control
/// characters, so that they stay readable in both JSON documents and logs.
#[must_use]
pub fn is_valid_tree_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}
