//! Async codec for the remote side of a hub connection.
//!
//! Speaks the same wire format as [`FramedSocket`](crate::FramedSocket) so
//! that tokio based remotes can drive an endpoint:
//!
//! ```text
//! SimLink RCH: CONNECT Owen\n          <- Frame::Line
//! XML_DOCUMENT_BEGIN\n                 <- Frame::Document
//! {"joints": {...}}\n
//! XML_DOCUMENT_END\n
//! ```

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{DOCUMENT_FOOTER, DOCUMENT_HEADER};

/// Maximum frame size (16 MB)
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One unit of traffic on a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A single text line without its terminator.
    Line(String),
    /// A document between the begin and end markers.
    Document(Value),
}

/// Codec for newline-terminated lines and marker-framed documents
#[derive(Debug, Default)]
pub struct RemoteCodec {
    _private: (),
}

impl RemoteCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RemoteCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(blank);

        let Some(line_end) = src.iter().position(|&b| b == b'\r' || b == b'\n') else {
            if src.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(src.len()));
            }
            return Ok(None);
        };

        if &src[..line_end] != DOCUMENT_HEADER.as_bytes() {
            let line = src.split_to(line_end);
            let text = std::str::from_utf8(&line)?.to_string();
            return Ok(Some(Frame::Line(text)));
        }

        let body_start = line_end + 1;
        let footer = DOCUMENT_FOOTER.as_bytes();
        let Some(footer_pos) = src[body_start..]
            .windows(footer.len())
            .position(|w| w == footer)
            .map(|pos| pos + body_start)
        else {
            if src.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(src.len()));
            }
            src.reserve(footer.len());
            return Ok(None);
        };

        let block = src.split_to(footer_pos + footer.len());
        let document: Value = serde_json::from_slice(&block[body_start..footer_pos])?;

        Ok(Some(Frame::Document(document)))
    }
}

impl Encoder<Frame> for RemoteCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Line(text) => {
                dst.reserve(text.len() + 1);
                dst.put_slice(text.as_bytes());
                dst.put_u8(b'\n');
            }
            Frame::Document(document) => {
                let body = serde_json::to_vec(&document)?;
                if body.len() > MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLarge(body.len()));
                }

                dst.reserve(DOCUMENT_HEADER.len() + body.len() + DOCUMENT_FOOTER.len() + 3);
                dst.put_slice(DOCUMENT_HEADER.as_bytes());
                dst.put_u8(b'\n');
                dst.put_slice(&body);
                dst.put_u8(b'\n');
                dst.put_slice(DOCUMENT_FOOTER.as_bytes());
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}
