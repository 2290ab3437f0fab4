//! Byte-stream handles used underneath [`FramedSocket`](crate::FramedSocket).
//!
//! The [`Transport`] trait is deliberately close to what a raw socket API
//! offers: a readiness wait, a count of bytes that can be read without
//! blocking, and single-shot receive/send calls. Retrying, buffering and
//! disconnect inference all live in the framing layer.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Upper bound for a single pending-byte probe on a TCP stream.
const PEEK_WINDOW: usize = 16 * 1024;

/// A duplex byte stream owned by exactly one [`FramedSocket`](crate::FramedSocket).
pub trait Transport {
    /// Whether the handle still reports a connected peer.
    fn is_connected(&self) -> bool;

    /// Block until the stream becomes readable or `timeout` elapses.
    ///
    /// `None` waits without a limit; a zero timeout returns immediately.
    /// Returns `Ok(true)` when the stream is readable (data or end of stream)
    /// and `Ok(false)` on timeout.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Number of bytes that can be received without blocking.
    ///
    /// Returns `Ok(0)` when nothing is pending and an
    /// [`io::ErrorKind::UnexpectedEof`] error once the peer has shut down.
    fn pending_bytes(&mut self) -> io::Result<usize>;

    /// Receive into `buf` without blocking; may return fewer bytes than pending.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send `data` with a single write call, returning the bytes accepted.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Gracefully shut down both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn is_connected(&self) -> bool {
        self.peer_addr().is_ok()
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Ok(false);
        }

        self.set_nonblocking(false)?;
        self.set_read_timeout(timeout)?;

        let mut probe = [0u8; 1];
        match self.peek(&mut probe) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn pending_bytes(&mut self) -> io::Result<usize> {
        self.set_nonblocking(true)?;

        let mut window = [0u8; PEEK_WINDOW];
        match self.peek(&mut window) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.set_nonblocking(true)?;
        self.read(buf)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.set_nonblocking(false)?;
        self.write(data)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}
