//! Wire protocol and transports for SimLink.
//!
//! This crate provides everything that touches bytes on a connection between
//! a simulation host and a remote controller.
//!
//! # Architecture
//!
//! - [`protocol`]: Handshake command line, reply lines and document markers
//! - [`transport`]: The [`Transport`] trait over raw byte streams
//! - [`framed`]: [`FramedSocket`], the host-side line/document reader and writer
//! - [`codec`]: Tokio codec speaking the same format for async remotes
//! - [`client`]: [`RemoteClient`] for attaching to a hub and exchanging documents
//!
//! # Example
//!
//! ```no_run
//! use simlink_rpc::{DEFAULT_HANDSHAKE, RemoteClient};
//!
//! # async fn example() -> Result<(), simlink_rpc::ClientError> {
//! let mut client = RemoteClient::connect(("127.0.0.1", 7770)).await?;
//! client.attach(DEFAULT_HANDSHAKE, "Owen").await?;
//!
//! let reply = client.exchange(serde_json::json!({"echo": {"ping": 1}})).await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod framed;
pub mod protocol;
pub mod transport;

pub use client::{ClientError, DEFAULT_REPLY_TIMEOUT, RemoteClient};
pub use codec::{CodecError, Frame, RemoteCodec};
pub use framed::{DEFAULT_READ_CHUNK, FrameError, FramedSocket};
pub use protocol::{
    ACK_LINE, CommandError, DEFAULT_HANDSHAKE, DEFAULT_PORT, DOCUMENT_FOOTER, DOCUMENT_HEADER,
    ERROR_LINE, HubCommand, HubReply, parse_command_line,
};
pub use transport::Transport;

pub use simlink_types::{Phase, ScheduleOp};
