//! Async remote-side client for a SimLink hub.
//!
//! A remote controller connects over TCP, attaches to an endpoint with the
//! handshake line and then exchanges documents with it.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::{CodecError, Frame, RemoteCodec};
use crate::protocol::{HubCommand, HubReply};

/// Default time to wait for a reply from the hub or the endpoint.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur with the remote client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Hub refused the connection to '{0}'")]
    Rejected(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
}

/// Remote end of one hub connection.
pub struct RemoteClient {
    framed: Framed<TcpStream, RemoteCodec>,
    peer: SocketAddr,
    reply_timeout: Duration,
}

impl RemoteClient {
    /// Open a TCP connection to the hub.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        debug!("Connected to hub at {peer}");

        Ok(Self {
            framed: Framed::new(stream, RemoteCodec::new()),
            peer,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send the CONNECT command and wait for the hub's verdict.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rejected` if the hub answers `ERROR`, and
    /// `ClientError::ConnectionClosed` if it drops the connection instead.
    pub async fn attach(&mut self, handshake: &str, pattern: &str) -> Result<(), ClientError> {
        let command = HubCommand::Connect {
            pattern: pattern.to_string(),
        };
        self.send_line(&command.to_line(handshake)).await?;

        let reply = self.recv_line().await?;
        match HubReply::parse(&reply) {
            Some(HubReply::Ack) => {
                debug!("Attached to endpoint matching '{pattern}'");
                Ok(())
            }
            Some(HubReply::Error) => Err(ClientError::Rejected(pattern.to_string())),
            None => Err(ClientError::UnexpectedFrame(reply)),
        }
    }

    /// Send a raw line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        self.framed.send(Frame::Line(line.to_string())).await?;
        Ok(())
    }

    /// Send one framed document.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn send_document(&mut self, document: Value) -> Result<(), ClientError> {
        self.framed.send(Frame::Document(document)).await?;
        Ok(())
    }

    /// Wait for the next line.
    ///
    /// # Errors
    ///
    /// Fails on timeout, on a closed connection, or when a document arrives
    /// instead.
    pub async fn recv_line(&mut self) -> Result<String, ClientError> {
        match self.next_frame().await? {
            Frame::Line(line) => Ok(line),
            Frame::Document(doc) => Err(ClientError::UnexpectedFrame(doc.to_string())),
        }
    }

    /// Wait for the next document.
    ///
    /// # Errors
    ///
    /// Fails on timeout, on a closed connection, or when a line arrives
    /// instead.
    pub async fn recv_document(&mut self) -> Result<Value, ClientError> {
        match self.next_frame().await? {
            Frame::Document(doc) => Ok(doc),
            Frame::Line(line) => Err(ClientError::UnexpectedFrame(line)),
        }
    }

    /// Send a document and wait for the next one from the endpoint.
    ///
    /// # Errors
    ///
    /// See [`send_document`](Self::send_document) and
    /// [`recv_document`](Self::recv_document).
    pub async fn exchange(&mut self, document: Value) -> Result<Value, ClientError> {
        self.send_document(document).await?;
        self.recv_document().await
    }

    /// Close the write half so the endpoint sees end of stream.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.framed.close().await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, ClientError> {
        tokio::time::timeout(self.reply_timeout, self.framed.next())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::ConnectionClosed)?
            .map_err(ClientError::from)
    }
}
