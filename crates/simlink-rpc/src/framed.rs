//! Line- and document-oriented framing on top of a [`Transport`].
//!
//! Incoming lines may be terminated with LF or CRLF; outgoing lines are
//! terminated with LF. Documents travel between marker lines:
//!
//! ```text
//! XML_DOCUMENT_BEGIN
//! { "joints": { ... } }
//! XML_DOCUMENT_END
//! ```
//!
//! The footer is searched anywhere after the header, so the line terminator
//! in front of it is optional. Documents are JSON values parsed straight out
//! of the receive buffer; the parsed byte range stays at the front of the
//! buffer (tracked by the in-place parse length) until the next extraction
//! attempt drops it.
//!
//! End of stream and network errors are not reported reliably by every
//! transport. In blocking mode with a timeout of at least one millisecond the
//! socket infers a dead peer when the readiness wait returns almost instantly
//! and still nothing can be read. In non-blocking mode only explicit end of
//! stream is noticed.
//!
//! No flood protection: the receive buffer grows without limit.

use std::io::{self, BufWriter, Write};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::protocol::{DOCUMENT_FOOTER, DOCUMENT_HEADER};
use crate::transport::Transport;

/// Default amount of receive buffer reserved per physical read.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// A closed or failed socket returns from a readiness wait within a few
/// microseconds, a live one with a timeout of at least 1 ms never does.
pub const IMMEDIATE_RETURN_THRESHOLD: Duration = Duration::from_micros(500);

/// Smallest timeout for which disconnect inference is trusted.
const MIN_INFERENCE_TIMEOUT: Duration = Duration::from_millis(1);

/// Traffic dumps are split into blocks of this many bytes.
const DUMP_BLOCK_SIZE: usize = 500;

/// Output buffer in front of the socket while streaming a document body.
const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Errors reported by [`FramedSocket`] reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Socket is not connected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Partial write: {sent} of {expected} bytes")]
    PartialWrite { sent: usize, expected: usize },

    #[error("Malformed document: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Outcome of one attempt to pull a document out of the buffer.
enum Extraction {
    Found,
    NotFound,
    ParseError(serde_json::Error),
}

/// Exclusive wrapper around one connection.
pub struct FramedSocket {
    stream: Option<Box<dyn Transport>>,
    buffer: BytesMut,
    /// Leading bytes of `buffer` that belong to `in_document`.
    in_place_len: usize,
    blocking: bool,
    /// `None` means no limit.
    timeout: Option<Duration>,
    read_chunk: usize,
    line: String,
    in_document: Option<Value>,
    out_document: Value,
    log_all_communications: bool,
}

impl std::fmt::Debug for FramedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedSocket")
            .field("connected", &self.is_good())
            .field("buffered", &self.buffer.len())
            .field("in_place_len", &self.in_place_len)
            .field("blocking", &self.blocking)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FramedSocket {
    /// Wrap a connected stream. Reads start out non-blocking.
    #[must_use]
    pub fn new(stream: impl Transport + 'static) -> Self {
        Self::from_boxed(Some(Box::new(stream)))
    }

    /// Wrap an optional boxed stream; `None` yields a socket that is never good.
    #[must_use]
    pub fn from_boxed(stream: Option<Box<dyn Transport>>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(DEFAULT_READ_CHUNK),
            in_place_len: 0,
            blocking: false,
            timeout: Some(Duration::ZERO),
            read_chunk: DEFAULT_READ_CHUNK,
            line: String::new(),
            in_document: None,
            out_document: Value::Null,
            log_all_communications: false,
        }
    }

    /// Set how many bytes of buffer space are reserved per physical read.
    #[must_use]
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    /// Dump every inbound and outbound byte at trace level.
    pub fn set_log_all_communications(&mut self, enabled: bool) {
        self.log_all_communications = enabled;
    }

    /// Whether a handle is held and it reports a connected peer.
    #[must_use]
    pub fn is_good(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Configure read behaviour.
    ///
    /// With `should_block`, reads wait up to `timeout` for more data per
    /// physical read; `None` waits without limit. A zero timeout does not
    /// mean "no timeout" but "do not wait". Writes never retry.
    pub fn set_blocking(&mut self, should_block: bool, timeout: Option<Duration>) {
        self.blocking = should_block;
        self.timeout = timeout;
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Shut the stream down and release the handle.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Disconnected`] if no handle is held, or the
    /// shutdown error. The handle is released in both cases.
    pub fn close(&mut self) -> Result<(), FrameError> {
        let mut stream = self.stream.take().ok_or(FrameError::Disconnected)?;
        stream.shutdown()?;
        Ok(())
    }

    /// The last line read by [`get_line`](Self::get_line).
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The last document read by [`get_document`](Self::get_document), until
    /// the next read attempt invalidates it.
    #[must_use]
    pub fn in_document(&self) -> Option<&Value> {
        self.in_document.as_ref()
    }

    /// The reusable outbound document sent by `put_document(None)`.
    #[must_use]
    pub fn out_document(&self) -> &Value {
        &self.out_document
    }

    pub fn out_document_mut(&mut self) -> &mut Value {
        &mut self.out_document
    }

    /// Number of raw bytes currently buffered, including an in-place parse.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next non-empty, LF or CRLF terminated line.
    ///
    /// Refills the buffer from the stream as needed. On success the line is
    /// stored (see [`line`](Self::line)) and returned without terminator; on
    /// failure the stored line is left untouched.
    pub fn get_line(&mut self) -> Option<&str> {
        loop {
            if self.extract_line() {
                return Some(&self.line);
            }
            if !self.fill_buffer() {
                return None;
            }
        }
    }

    /// Write `text` followed by a single LF in one send.
    ///
    /// # Errors
    ///
    /// Fails if the socket is not good or the write is not complete; a failed
    /// write releases the handle.
    pub fn put_line(&mut self, text: &str) -> Result<(), FrameError> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.put_raw(&data)
    }

    /// Read the next framed document.
    ///
    /// Returns `Ok(None)` when no complete block is available and no more data
    /// could be read (check [`is_good`](Self::is_good) to tell a dead peer from
    /// a timeout). Preceding garbage other than whitespace is not skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Parse`] for a complete block whose content is not
    /// a valid document. The corrupt block is dropped by the next read.
    pub fn get_document(&mut self) -> Result<Option<&Value>, FrameError> {
        loop {
            match self.extract_document() {
                Extraction::Found => return Ok(self.in_document.as_ref()),
                Extraction::ParseError(e) => return Err(FrameError::Parse(e)),
                Extraction::NotFound => {}
            }
            if !self.fill_buffer() {
                return Ok(None);
            }
        }
    }

    /// Send a framed document, or the stored outbound document if `None`.
    ///
    /// The body is streamed through a writer that records whether every
    /// underlying write succeeded; header, body and footer must all succeed.
    ///
    /// # Errors
    ///
    /// Returns the first failure among header, body and footer.
    pub fn put_document(&mut self, document: Option<&Value>) -> Result<(), FrameError> {
        if !self.is_good() {
            return Err(FrameError::Disconnected);
        }

        match document {
            Some(doc) => self.write_framed(doc),
            None => {
                let doc = std::mem::take(&mut self.out_document);
                let result = self.write_framed(&doc);
                self.out_document = doc;
                result
            }
        }
    }

    fn write_framed(&mut self, document: &Value) -> Result<(), FrameError> {
        let header = self.put_line(DOCUMENT_HEADER);

        let mut writer = BufWriter::with_capacity(
            WRITE_BUFFER_SIZE,
            DocumentWriter {
                socket: &mut *self,
                good: true,
                first_error: None,
            },
        );
        let serialized = serde_json::to_writer(&mut writer, document)
            .map_err(FrameError::Serialize)
            .and_then(|()| writer.write_all(b"\n").map_err(FrameError::Io));
        let body = match writer.into_inner() {
            Ok(inner) => match (serialized, inner.good) {
                (Err(e), _) => Err(e),
                (Ok(()), true) => Ok(()),
                (Ok(()), false) => Err(inner.first_error.unwrap_or(FrameError::Disconnected)),
            },
            Err(e) => Err(FrameError::Io(e.into_error())),
        };

        let footer = self.put_line(DOCUMENT_FOOTER);

        header.and(body).and(footer)
    }

    /// Write raw bytes with a single send.
    ///
    /// # Errors
    ///
    /// Fails if the socket is not good or fewer bytes than requested were
    /// accepted, in which case the handle is released.
    pub fn put_raw(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if !self.is_good() {
            return Err(FrameError::Disconnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(FrameError::Disconnected);
        };

        let result = stream.send(data);

        if self.log_all_communications {
            dump_outbound(data);
        }

        match result {
            Ok(sent) if sent == data.len() => Ok(()),
            Ok(sent) => {
                warn!("Partial write ({sent} of {} bytes), dropping the connection", data.len());
                self.stream = None;
                Err(FrameError::PartialWrite {
                    sent,
                    expected: data.len(),
                })
            }
            Err(e) => {
                debug!("Write failed, dropping the connection: {e}");
                self.stream = None;
                Err(FrameError::Io(e))
            }
        }
    }

    /// Drop an in-place parse and any leading whitespace from the buffer.
    fn cleanup_buffer(&mut self) {
        let consumed = self.in_place_len.min(self.buffer.len());
        self.buffer.advance(consumed);
        self.in_place_len = 0;
        self.in_document = None;

        let whitespace = self
            .buffer
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c))
            .count();
        self.buffer.advance(whitespace);
    }

    fn extract_line(&mut self) -> bool {
        self.cleanup_buffer();

        let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') else {
            return false;
        };

        // the terminator stays in the buffer and goes with the next cleanup
        let line = self.buffer.split_to(end);
        self.line = String::from_utf8_lossy(&line).into_owned();
        true
    }

    fn extract_document(&mut self) -> Extraction {
        self.cleanup_buffer();

        let header = DOCUMENT_HEADER.as_bytes();
        if !self.buffer.starts_with(header) {
            return Extraction::NotFound;
        }
        match self.buffer.get(header.len()) {
            Some(b'\r' | b'\n') => {}
            _ => return Extraction::NotFound,
        }

        let content_start = header.len() + 1;
        let Some(footer_pos) = find(&self.buffer[content_start..], DOCUMENT_FOOTER.as_bytes())
            .map(|pos| pos + content_start)
        else {
            return Extraction::NotFound;
        };

        // also covers the corrupt case, so the block is dropped on the next read
        self.in_place_len = footer_pos + DOCUMENT_FOOTER.len();

        match serde_json::from_slice::<Value>(&self.buffer[content_start..footer_pos]) {
            Ok(document) => {
                self.in_document = Some(document);
                Extraction::Found
            }
            Err(e) => Extraction::ParseError(e),
        }
    }

    /// One physical read. Returns `true` if new bytes were appended.
    fn fill_buffer(&mut self) -> bool {
        if !self.is_good() {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut returned_immediately = true;
        if self.blocking {
            let started = Instant::now();
            if let Err(e) = stream.wait_readable(self.timeout) {
                debug!("Readiness wait failed, dropping the connection: {e}");
                self.stream = None;
                return false;
            }
            returned_immediately = started.elapsed() < IMMEDIATE_RETURN_THRESHOLD;
        }

        let pending = stream.pending_bytes();
        let has_data = matches!(pending, Ok(n) if n > 0);
        let inference_trusted =
            self.blocking && self.timeout.is_none_or(|t| t >= MIN_INFERENCE_TIMEOUT);

        if inference_trusted && returned_immediately && !has_data {
            debug!("Blocking wait returned immediately without data, inferring a dead connection");
            self.stream = None;
            return false;
        }

        let pending = match pending {
            Ok(0) => return false,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Peer closed the connection");
                self.stream = None;
                return false;
            }
            Err(e) => {
                trace!("Pending data check failed: {e}");
                return false;
            }
        };

        let wanted = pending.min(self.read_chunk);
        let old_len = self.buffer.len();
        self.buffer.resize(old_len + wanted, 0);

        match stream.recv(&mut self.buffer[old_len..]) {
            Ok(0) => {
                self.buffer.truncate(old_len);
                debug!("Peer closed the connection");
                self.stream = None;
                false
            }
            Ok(read) => {
                // tolerate a short read
                self.buffer.truncate(old_len + read);
                if self.log_all_communications {
                    dump_inbound(&self.buffer[old_len..]);
                }
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.buffer.truncate(old_len);
                false
            }
            Err(e) => {
                self.buffer.truncate(old_len);
                debug!("Read failed, dropping the connection: {e}");
                self.stream = None;
                false
            }
        }
    }
}

/// `io::Write` adapter that forwards every write to the socket and remembers
/// whether all of them succeeded.
struct DocumentWriter<'a> {
    socket: &'a mut FramedSocket,
    good: bool,
    first_error: Option<FrameError>,
}

impl Write for DocumentWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.good
            && let Err(e) = self.socket.put_raw(buf)
        {
            self.good = false;
            self.first_error = Some(e);
        }
        // keep the serializer going; the outcome is read from `good`
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn dump_inbound(data: &[u8]) {
    for block in data.chunks(DUMP_BLOCK_SIZE) {
        trace!(target: "simlink::wire::inbound", "\n{}", String::from_utf8_lossy(block));
    }
}

fn dump_outbound(data: &[u8]) {
    for block in data.chunks(DUMP_BLOCK_SIZE) {
        trace!(target: "simlink::wire::outbound", "\n{}", String::from_utf8_lossy(block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// How a scripted stream behaves once its chunks are used up.
    #[derive(Clone, Copy, PartialEq)]
    enum WhenDrained {
        /// Live peer: waits time out.
        Idle,
        /// Orderly shutdown reported as end of stream.
        Eof,
        /// Dead peer the transport cannot report: waits return at once, no data.
        Silent,
    }

    struct ScriptedTransport {
        inbound: VecDeque<Vec<u8>>,
        outbound: Rc<RefCell<Vec<u8>>>,
        when_drained: WhenDrained,
        max_send: Option<usize>,
    }

    impl ScriptedTransport {
        fn new(chunks: &[&[u8]], when_drained: WhenDrained) -> (Self, Rc<RefCell<Vec<u8>>>) {
            let outbound = Rc::new(RefCell::new(Vec::new()));
            let transport = Self {
                inbound: chunks.iter().map(|c| c.to_vec()).collect(),
                outbound: outbound.clone(),
                when_drained,
                max_send: None,
            };
            (transport, outbound)
        }
    }

    impl Transport for ScriptedTransport {
        fn is_connected(&self) -> bool {
            true
        }

        fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
            if !self.inbound.is_empty() {
                return Ok(true);
            }
            match self.when_drained {
                WhenDrained::Idle => {
                    if let Some(t) = timeout {
                        std::thread::sleep(t);
                    }
                    Ok(false)
                }
                WhenDrained::Eof | WhenDrained::Silent => Ok(true),
            }
        }

        fn pending_bytes(&mut self) -> io::Result<usize> {
            match self.inbound.front() {
                Some(chunk) => Ok(chunk.len()),
                None if self.when_drained == WhenDrained::Eof => {
                    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))
                }
                None => Ok(0),
            }
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.inbound.pop_front() else {
                return Err(io::ErrorKind::WouldBlock.into());
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.inbound.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        fn send(&mut self, data: &[u8]) -> io::Result<usize> {
            let n = self.max_send.map_or(data.len(), |max| max.min(data.len()));
            self.outbound.borrow_mut().extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn socket_with(chunks: &[&[u8]], when_drained: WhenDrained) -> FramedSocket {
        let (transport, _) = ScriptedTransport::new(chunks, when_drained);
        FramedSocket::new(transport)
    }

    #[test]
    fn test_get_line_lf_and_crlf() {
        let mut socket = socket_with(&[b"first\r\nsecond\nthird"], WhenDrained::Idle);

        assert_eq!(socket.get_line(), Some("first"));
        assert_eq!(socket.get_line(), Some("second"));
        assert_eq!(socket.get_line(), None);
        assert_eq!(socket.line(), "second");
    }

    #[test]
    fn test_get_line_skips_leading_blank_lines() {
        let mut socket = socket_with(&[b"\r\n\r\n\n  \tpayload\n"], WhenDrained::Idle);
        assert_eq!(socket.get_line(), Some("payload"));
    }

    #[test]
    fn test_get_line_assembles_chunks() {
        let mut socket = socket_with(&[b"SimLink R", b"CH: CONN", b"ECT Owen", b"\r\n"], WhenDrained::Idle);
        assert_eq!(socket.get_line(), Some("SimLink RCH: CONNECT Owen"));
    }

    #[test]
    fn test_get_line_failure_keeps_stored_line() {
        let mut socket = socket_with(&[b"kept\npartial"], WhenDrained::Idle);
        assert_eq!(socket.get_line(), Some("kept"));
        assert_eq!(socket.get_line(), None);
        assert_eq!(socket.line(), "kept");
    }

    #[test]
    fn test_put_line_appends_lf() {
        let (transport, outbound) = ScriptedTransport::new(&[], WhenDrained::Idle);
        let mut socket = FramedSocket::new(transport);

        socket.put_line("OK").unwrap();
        assert_eq!(outbound.borrow().as_slice(), b"OK\n");
    }

    #[test]
    fn test_partial_write_releases_handle() {
        let (mut transport, _) = ScriptedTransport::new(&[], WhenDrained::Idle);
        transport.max_send = Some(2);
        let mut socket = FramedSocket::new(transport);

        let err = socket.put_line("ERROR").unwrap_err();
        assert!(matches!(err, FrameError::PartialWrite { sent: 2, expected: 6 }));
        assert!(!socket.is_good());
    }

    #[test]
    fn test_get_document_waits_for_footer() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\n{\"a\": 1", b"}\n"],
            WhenDrained::Idle,
        );
        assert!(socket.get_document().unwrap().is_none());
        assert!(socket.in_document().is_none());
    }

    #[test]
    fn test_get_document_parses_block() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\r\n{\"arm\": {\"angle\": 0.5}}\r\nXML_DOCUMENT_END\r\n"],
            WhenDrained::Idle,
        );

        let doc = socket.get_document().unwrap().unwrap().clone();
        assert_eq!(doc, json!({"arm": {"angle": 0.5}}));
        assert_eq!(socket.in_document(), Some(&doc));
    }

    #[test]
    fn test_get_document_footer_without_line_break() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\n[1,2,3]XML_DOCUMENT_END"],
            WhenDrained::Idle,
        );
        assert_eq!(socket.get_document().unwrap(), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_consumed_document_does_not_reappear() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\n{\"n\":1}\nXML_DOCUMENT_END\nafter\n"],
            WhenDrained::Idle,
        );

        assert!(socket.get_document().unwrap().is_some());
        assert_eq!(socket.get_line(), Some("after"));
        assert!(socket.in_document().is_none());
        assert_eq!(socket.buffered_len(), 1);
    }

    #[test]
    fn test_two_documents_back_to_back() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\n{\"n\":1}\nXML_DOCUMENT_END\nXML_DOCUMENT_BEGIN\n{\"n\":2}\nXML_DOCUMENT_END\n"],
            WhenDrained::Idle,
        );

        assert_eq!(socket.get_document().unwrap(), Some(&json!({"n": 1})));
        assert_eq!(socket.get_document().unwrap(), Some(&json!({"n": 2})));
        assert!(socket.get_document().unwrap().is_none());
    }

    #[test]
    fn test_malformed_document_is_parse_error_and_dropped() {
        let mut socket = socket_with(
            &[b"XML_DOCUMENT_BEGIN\n{oops\nXML_DOCUMENT_END\nXML_DOCUMENT_BEGIN\n{}\nXML_DOCUMENT_END\n"],
            WhenDrained::Idle,
        );

        assert!(matches!(socket.get_document(), Err(FrameError::Parse(_))));
        assert_eq!(socket.get_document().unwrap(), Some(&json!({})));
    }

    #[test]
    fn test_garbage_before_header_is_not_skipped() {
        let mut socket = socket_with(
            &[b"garbage\nXML_DOCUMENT_BEGIN\n{}\nXML_DOCUMENT_END\n"],
            WhenDrained::Idle,
        );
        assert!(socket.get_document().unwrap().is_none());
        assert_eq!(socket.get_line(), Some("garbage"));
        assert!(socket.get_document().unwrap().is_some());
    }

    #[test]
    fn test_put_document_frames_body() {
        let (transport, outbound) = ScriptedTransport::new(&[], WhenDrained::Idle);
        let mut socket = FramedSocket::new(transport);

        socket.put_document(Some(&json!({"x": 1}))).unwrap();
        let written = String::from_utf8(outbound.borrow().clone()).unwrap();
        assert_eq!(written, "XML_DOCUMENT_BEGIN\n{\"x\":1}\nXML_DOCUMENT_END\n");
    }

    #[test]
    fn test_put_document_defaults_to_out_document() {
        let (transport, outbound) = ScriptedTransport::new(&[], WhenDrained::Idle);
        let mut socket = FramedSocket::new(transport);
        *socket.out_document_mut() = json!({"clock": {"step": 3}});

        socket.put_document(None).unwrap();
        let written = String::from_utf8(outbound.borrow().clone()).unwrap();
        assert!(written.contains("{\"clock\":{\"step\":3}}"));
        assert_eq!(socket.out_document(), &json!({"clock": {"step": 3}}));
    }

    #[test]
    fn test_put_document_output_reads_back() {
        let (transport, outbound) = ScriptedTransport::new(&[], WhenDrained::Idle);
        let mut sender = FramedSocket::new(transport);
        let doc = json!({"joints": {"knee": [0.1, 0.2]}, "name": "Owen"});
        sender.put_document(Some(&doc)).unwrap();

        let bytes = outbound.borrow().clone();
        let mut receiver = socket_with(&[&bytes], WhenDrained::Idle);
        assert_eq!(receiver.get_document().unwrap(), Some(&doc));
    }

    #[test]
    fn test_put_document_on_dead_socket() {
        let mut socket = FramedSocket::from_boxed(None);
        assert!(matches!(
            socket.put_document(Some(&json!({}))),
            Err(FrameError::Disconnected)
        ));
    }

    #[test]
    fn test_blocking_eof_releases_handle() {
        let mut socket = socket_with(&[b"partial"], WhenDrained::Eof);
        socket.set_blocking(true, Some(Duration::from_millis(50)));

        assert!(socket.get_line().is_none());
        assert!(!socket.is_good());
    }

    #[test]
    fn test_silent_close_is_inferred_when_blocking() {
        let mut socket = socket_with(&[], WhenDrained::Silent);
        socket.set_blocking(true, Some(Duration::from_millis(50)));

        assert!(socket.get_document().unwrap().is_none());
        assert!(!socket.is_good());
    }

    #[test]
    fn test_silent_close_is_not_inferred_without_blocking() {
        let mut socket = socket_with(&[], WhenDrained::Silent);
        socket.set_blocking(false, Some(Duration::from_millis(50)));

        assert!(socket.get_line().is_none());
        assert!(socket.is_good());
    }

    #[test]
    fn test_zero_timeout_does_not_infer_disconnect() {
        let mut socket = socket_with(&[], WhenDrained::Silent);
        socket.set_blocking(true, Some(Duration::ZERO));

        assert!(socket.get_line().is_none());
        assert!(socket.is_good());
    }

    #[test]
    fn test_blocking_timeout_keeps_live_connection() {
        let mut socket = socket_with(&[], WhenDrained::Idle);
        socket.set_blocking(true, Some(Duration::from_millis(5)));

        assert!(socket.get_line().is_none());
        assert!(socket.is_good());
    }

    #[test]
    fn test_read_chunk_limits_single_read() {
        let mut socket = socket_with(&[b"abcdefgh\n"], WhenDrained::Idle).with_read_chunk(3);
        assert_eq!(socket.get_line(), Some("abcdefgh"));
    }

    #[test]
    fn test_close_releases_handle() {
        let mut socket = socket_with(&[], WhenDrained::Idle);
        socket.close().unwrap();
        assert!(!socket.is_good());
        assert!(matches!(socket.close(), Err(FrameError::Disconnected)));
    }

    mod chunking {
        use super::*;
        use proptest::prelude::*;

        fn split_into_chunks(data: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
            let mut points: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
            points.sort_unstable();
            points.dedup();

            let mut chunks = Vec::new();
            let mut start = 0;
            for point in points {
                if point > start {
                    chunks.push(data[start..point].to_vec());
                    start = point;
                }
            }
            if start < data.len() {
                chunks.push(data[start..].to_vec());
            }
            chunks
        }

        fn drain_lines(chunks: &[Vec<u8>]) -> Vec<String> {
            let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let mut socket = socket_with(&refs, WhenDrained::Idle);
            let mut lines = Vec::new();
            while let Some(line) = socket.get_line() {
                lines.push(line.to_string());
            }
            lines
        }

        proptest! {
            #[test]
            fn chunked_lines_match_whole_stream(
                lines in proptest::collection::vec("[a-zA-Z0-9 :*?]{0,24}", 1..6),
                crlf in any::<bool>(),
                cuts in proptest::collection::vec(any::<usize>(), 0..12),
            ) {
                let terminator = if crlf { "\r\n" } else { "\n" };
                let stream: String = lines.iter().map(|l| format!("{l}{terminator}")).collect();
                let data = stream.as_bytes();

                let whole = drain_lines(&[data.to_vec()]);
                let chunked = drain_lines(&split_into_chunks(data, &cuts));
                prop_assert_eq!(whole, chunked);
            }

            #[test]
            fn chunked_document_matches_whole_stream(
                value in any::<i64>(),
                cuts in proptest::collection::vec(any::<usize>(), 0..12),
            ) {
                let stream = format!("\r\n{DOCUMENT_HEADER}\n{{\"v\":{value}}}\n{DOCUMENT_FOOTER}\ntail\n");
                let data = stream.as_bytes();

                let chunks = split_into_chunks(data, &cuts);
                let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
                let mut socket = socket_with(&refs, WhenDrained::Idle);

                let doc = socket.get_document().unwrap().cloned();
                prop_assert_eq!(doc, Some(json!({"v": value})));
                prop_assert_eq!(socket.get_line(), Some("tail"));
            }
        }
    }
}
