//! Connections waiting for their handshake line.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use simlink_rpc::FramedSocket;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accepted connection owned by the hub until it is dispatched.
///
/// There is no timeout for stalled connections; they stay pending until
/// they send a line or disconnect.
#[derive(Debug)]
pub struct PendingConnection {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub accepted_at: Instant,
    pub socket: FramedSocket,
}

impl PendingConnection {
    #[must_use]
    pub fn new(socket: FramedSocket, peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            accepted_at: Instant::now(),
            socket,
        }
    }

    /// Time since the hub accepted this connection.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Peer address for log lines
    #[must_use]
    pub fn describe(&self) -> String {
        match self.peer {
            Some(addr) => format!("{} ({addr})", self.id),
            None => self.id.to_string(),
        }
    }
}
