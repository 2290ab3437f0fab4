//! Connection dispatch hub.
//!
//! Listens for TCP connections, holds them until their first line arrives,
//! parses that line as a `CONNECT` command and hands the socket to the named
//! endpoint. Everything here runs on the host thread and never blocks: the
//! listener and pending sockets are polled once per step.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use simlink_core::config::Config;
use simlink_core::EndpointDirectory;
use simlink_rpc::protocol::{HubCommand, HubReply, parse_command_line};
use simlink_rpc::FramedSocket;
use tracing::{debug, info, trace, warn};

use crate::error::{DaemonError, HubError, Result};
use crate::session::PendingConnection;

/// Settings the hub needs from the config file.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub port: u16,
    pub localhost_only: bool,
    pub socket_buffer_size: usize,
    pub handshake: String,
    pub read_chunk_size: usize,
    pub log_all_communications: bool,
}

impl From<&Config> for HubOptions {
    fn from(config: &Config) -> Self {
        Self {
            port: config.hub.listen_port,
            localhost_only: config.hub.listen_only_on_localhost,
            socket_buffer_size: config.hub.socket_buffer_size,
            handshake: config.hub.handshake.clone(),
            read_chunk_size: config.transport.read_chunk_size,
            log_all_communications: config.transport.log_all_communications,
        }
    }
}

impl Default for HubOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What a single [`ConnectionDispatchHub::poll`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub accepted: usize,
    pub dispatched: usize,
    pub rejected: usize,
    pub lost: usize,
}

pub struct ConnectionDispatchHub {
    listener: TcpListener,
    options: HubOptions,
    pending: Vec<PendingConnection>,
}

impl ConnectionDispatchHub {
    /// Bind the listening socket.
    ///
    /// Port 0 asks the OS for a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Bind`] if the address is unavailable.
    pub fn bind(options: HubOptions) -> Result<Self> {
        let ip = if options.localhost_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let addr = SocketAddr::new(ip, options.port);

        let listener = TcpListener::bind(addr).map_err(|source| DaemonError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;

        info!("Hub listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            options,
            pending: Vec::new(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Connections accepted but not yet dispatched.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Accept new connections, then dispatch every pending one whose first
    /// line has arrived.
    pub fn poll(&mut self, directory: &EndpointDirectory) -> PollSummary {
        let mut summary = PollSummary {
            accepted: self.accept_new(),
            ..PollSummary::default()
        };
        self.manage_pending(directory, &mut summary);
        summary
    }

    fn accept_new(&mut self) -> usize {
        let mut accepted = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let socket = self.wrap(stream);
                    let conn = PendingConnection::new(socket, Some(peer));
                    debug!("Accepted connection {}", conn.describe());
                    self.pending.push(conn);
                    accepted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    break;
                }
            }
        }
        accepted
    }

    fn wrap(&self, stream: TcpStream) -> FramedSocket {
        size_buffers(&stream, self.options.socket_buffer_size);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle's algorithm: {e}");
        }

        let mut socket =
            FramedSocket::new(stream).with_read_chunk(self.options.read_chunk_size);
        socket.set_log_all_communications(self.options.log_all_communications);
        socket.set_blocking(false, None);
        socket
    }

    fn manage_pending(&mut self, directory: &EndpointDirectory, summary: &mut PollSummary) {
        let mut still_pending = Vec::with_capacity(self.pending.len());

        for mut conn in std::mem::take(&mut self.pending) {
            let Some(line) = conn.socket.get_line().map(str::to_owned) else {
                if conn.socket.is_good() {
                    still_pending.push(conn);
                } else {
                    debug!("{}: {}", conn.describe(), HubError::ReadFailure);
                    summary.lost += 1;
                }
                continue;
            };

            trace!(
                "{} sent '{line}' {:?} after accept",
                conn.describe(),
                conn.age()
            );
            let describe = conn.describe();
            match self.dispatch(&line, conn, directory) {
                Ok(name) => {
                    info!("Connection {describe} attached to '{name}'");
                    summary.dispatched += 1;
                }
                Err(e) => {
                    warn!("Rejected connection {describe}: {e}");
                    summary.rejected += 1;
                }
            }
        }

        self.pending = still_pending;
    }

    /// Act on one command line. The connection is consumed either way.
    fn dispatch(
        &self,
        line: &str,
        mut conn: PendingConnection,
        directory: &EndpointDirectory,
    ) -> std::result::Result<String, HubError> {
        let resolved = parse_command_line(line, &self.options.handshake)
            .map_err(HubError::from)
            .and_then(|command| match command {
                HubCommand::Connect { pattern } => {
                    directory.resolve(&pattern).map_err(HubError::from)
                }
            });
        let endpoint = match resolved {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reject(&mut conn);
                return Err(e);
            }
        };

        // An endpoint mid-update cannot take a socket right now. The borrow is
        // held until the socket is handed over so OK is never sent in vain.
        let Ok(mut target) = endpoint.try_borrow_mut() else {
            reject(&mut conn);
            return Err(HubError::TargetBusy(line.to_string()));
        };
        let name = target.name().to_string();

        conn.socket
            .put_line(HubReply::Ack.as_line())
            .map_err(|e| HubError::AcknowledgementSendFailure(e.to_string()))?;

        target.attach(conn.socket);
        Ok(name)
    }
}

fn reject(conn: &mut PendingConnection) {
    if let Err(e) = conn.socket.put_line(HubReply::Error.as_line()) {
        debug!("Could not send ERROR to {}: {e}", conn.describe());
    }
}

/// Request socket buffer sizes; the OS may round or cap them.
#[cfg(unix)]
fn size_buffers(stream: &TcpStream, size: usize) {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let requested = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    for (option, label) in [(libc::SO_RCVBUF, "receive"), (libc::SO_SNDBUF, "send")] {
        // SAFETY: `fd` belongs to `stream`, which outlives the call, and the
        // option value is a c_int of the advertised length.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                (&raw const requested).cast::<libc::c_void>(),
                INT_LEN,
            )
        };
        if ret != 0 {
            warn!(
                "Failed to set {label} buffer size to {size}: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    match (
        buffer_size(fd, libc::SO_RCVBUF),
        buffer_size(fd, libc::SO_SNDBUF),
    ) {
        (Some(recv), Some(send)) => {
            debug!("Socket buffers: requested {size}, receive {recv}, send {send}");
        }
        _ => debug!(
            "Could not read back socket buffer sizes: {}",
            std::io::Error::last_os_error()
        ),
    }
}

#[cfg(not(unix))]
fn size_buffers(_stream: &TcpStream, size: usize) {
    debug!("Socket buffer sizing unsupported on this platform, keeping OS defaults (wanted {size})");
}

#[cfg(unix)]
#[allow(clippy::cast_possible_truncation)] // size_of::<c_int>() is 4
const INT_LEN: libc::socklen_t = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

#[cfg(unix)]
fn buffer_size(fd: std::os::fd::RawFd, option: libc::c_int) -> Option<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = INT_LEN;
    // SAFETY: `value` and `len` are valid for writes for the whole call.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&raw mut value).cast::<libc::c_void>(),
            &raw mut len,
        )
    };
    (ret == 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::{BufRead, BufReader, Write};
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use simlink_core::{Endpoint, Schedule, ScheduleOp};

    fn test_options() -> HubOptions {
        HubOptions {
            port: 0,
            ..HubOptions::default()
        }
    }

    fn connect(hub: &ConnectionDispatchHub) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(hub.local_addr().unwrap()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }

    /// Poll until `done` holds or two seconds pass.
    fn poll_until(
        hub: &mut ConnectionDispatchHub,
        directory: &EndpointDirectory,
        mut done: impl FnMut(&PollSummary) -> bool,
    ) -> PollSummary {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut total = PollSummary::default();
        while Instant::now() < deadline {
            let s = hub.poll(directory);
            total.accepted += s.accepted;
            total.dispatched += s.dispatched;
            total.rejected += s.rejected;
            total.lost += s.lost;
            if done(&total) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        total
    }

    fn read_reply(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    #[test]
    fn test_bind_localhost_only() {
        let hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let addr = hub.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn test_connect_attaches_endpoint() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let endpoint = Endpoint::shared("Owen", Schedule::default());
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&endpoint);

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"SimLink RCH: CONNECT Owen\n").unwrap();

        let summary = poll_until(&mut hub, &directory, |s| s.dispatched > 0);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(read_reply(&mut reader), "OK");
        assert!(endpoint.borrow().is_connected());
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn test_silent_connection_stays_pending() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let directory = EndpointDirectory::new();

        let (_stream, _reader) = connect(&hub);
        poll_until(&mut hub, &directory, |s| s.accepted > 0);

        assert_eq!(hub.pending_count(), 1);
        hub.poll(&directory);
        assert_eq!(hub.pending_count(), 1);
    }

    #[test]
    fn test_wrong_handshake_rejected() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let endpoint = Endpoint::shared("Owen", Schedule::default());
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&endpoint);

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"Hello CONNECT Owen\n").unwrap();

        let summary = poll_until(&mut hub, &directory, |s| s.rejected > 0);
        assert_eq!(summary.rejected, 1);
        assert_eq!(read_reply(&mut reader), "ERROR");
        assert!(!endpoint.borrow().is_connected());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let directory = EndpointDirectory::new();

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"SimLink RCH: PING\n").unwrap();

        poll_until(&mut hub, &directory, |s| s.rejected > 0);
        assert_eq!(read_reply(&mut reader), "ERROR");
    }

    #[test]
    fn test_opaque_target_rejected() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let floor = Rc::new(RefCell::new(()));
        let mut directory = EndpointDirectory::new();
        directory.add_opaque("Floor", &floor);

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"SimLink RCH: CONNECT Floor\n").unwrap();

        poll_until(&mut hub, &directory, |s| s.rejected > 0);
        assert_eq!(read_reply(&mut reader), "ERROR");
    }

    #[test]
    fn test_busy_endpoint_rejected() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let endpoint = Endpoint::shared("Owen", Schedule::default());
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&endpoint);

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"SimLink RCH: CONNECT Owen\n").unwrap();

        let guard = endpoint.borrow_mut();
        let summary = poll_until(&mut hub, &directory, |s| s.rejected > 0);
        drop(guard);

        assert_eq!(summary.rejected, 1);
        assert_eq!(read_reply(&mut reader), "ERROR");
    }

    #[test]
    fn test_shared_borrow_rejects_without_ack() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let endpoint = Endpoint::shared("Owen", Schedule::default());
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&endpoint);

        let (mut stream, mut reader) = connect(&hub);
        stream.write_all(b"SimLink RCH: CONNECT Owen\n").unwrap();

        let reading = endpoint.borrow();
        let summary = poll_until(&mut hub, &directory, |s| s.rejected > 0);
        drop(reading);

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.dispatched, 0);
        assert_eq!(read_reply(&mut reader), "ERROR");
        assert!(!endpoint.borrow().is_connected());
    }

    #[test]
    fn test_bad_line_does_not_affect_other_pending() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let endpoint = Endpoint::shared("Owen", Schedule::new(vec![ScheduleOp::Send], 1));
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&endpoint);

        // Move the cursor off the start with an earlier remote.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _earlier = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (host_side, _) = listener.accept().unwrap();
        endpoint.borrow_mut().attach(FramedSocket::new(host_side));
        endpoint.borrow_mut().pre_update(0.0);
        assert_eq!(endpoint.borrow().cursor().position(), 1);

        let (mut bad, mut bad_reader) = connect(&hub);
        let (mut good, mut good_reader) = connect(&hub);
        poll_until(&mut hub, &directory, |s| s.accepted == 2);
        assert_eq!(hub.pending_count(), 2);

        bad.write_all(b"Hello CONNECT Owen\n").unwrap();
        good.write_all(b"SimLink RCH: CONNECT Owen\n").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let summary = hub.poll(&directory);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(read_reply(&mut bad_reader), "ERROR");
        assert_eq!(read_reply(&mut good_reader), "OK");
        assert!(endpoint.borrow().is_connected());
        assert_eq!(endpoint.borrow().cursor().position(), 0);
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn test_hangup_before_handshake_is_lost() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let directory = EndpointDirectory::new();

        let (stream, reader) = connect(&hub);
        poll_until(&mut hub, &directory, |s| s.accepted > 0);
        drop(reader);
        drop(stream);

        let summary = poll_until(&mut hub, &directory, |s| s.lost > 0);
        assert_eq!(summary.lost, 1);
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn test_multiple_ready_connections_dispatched_in_one_poll() {
        let mut hub = ConnectionDispatchHub::bind(test_options()).unwrap();
        let left = Endpoint::shared("Left", Schedule::default());
        let right = Endpoint::shared("Right", Schedule::default());
        let mut directory = EndpointDirectory::new();
        directory.add_endpoint(&left);
        directory.add_endpoint(&right);

        let (mut a, _ra) = connect(&hub);
        let (mut b, _rb) = connect(&hub);
        a.write_all(b"SimLink RCH: CONNECT Left\n").unwrap();
        b.write_all(b"SimLink RCH: CONNECT Right\n").unwrap();

        poll_until(&mut hub, &directory, |s| s.dispatched == 2);
        assert!(left.borrow().is_connected());
        assert!(right.borrow().is_connected());
    }
}
