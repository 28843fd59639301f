//! Bounded line-delimited framing for the JSON-RPC wire format.
//!
//! Reads use a bounded line scanner: buffers grow from
//! [`crate::INITIAL_LINE_BYTES`] up to [`crate::MAX_LINE_BYTES`]; a line
//! that would exceed the hard cap is a decode error, which the server
//! interprets as "close the connection" rather than attempting to resync.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::MAX_LINE_BYTES;

/// Errors produced while decoding or encoding lines on the wire.
#[derive(Debug, thiserror::Error)]
pub enum LineCodecError {
    /// The line (including its newline) exceeded [`crate::MAX_LINE_BYTES`].
    #[error("line exceeded maximum of {max} bytes")]
    LineTooLong {
        /// The configured maximum.
        max: usize,
    },
    /// Underlying I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `tokio_util` codec that frames a byte stream into newline-terminated
/// lines, rejecting any line beyond [`crate::MAX_LINE_BYTES`].
///
/// This is transport-agnostic: it yields raw `String` lines. Callers
/// (`slb-ipc`, `slb-tcp`) parse each line as a [`crate::RpcRequest`] or
/// [`crate::RpcResponse`] and map JSON errors onto
/// [`crate::RpcErrorCode::ParseError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec {
    max_line_bytes: usize,
}

impl LineCodec {
    /// Build a codec with the default bound ([`crate::MAX_LINE_BYTES`]).
    pub fn new() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Build a codec with a caller-chosen bound (tests use small bounds to
    /// exercise the `LineTooLong` path without allocating a megabyte).
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = LineCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(newline_pos) = src.iter().position(|b| *b == b'\n') {
            if newline_pos > self.max_line_bytes {
                return Err(LineCodecError::LineTooLong {
                    max: self.max_line_bytes,
                });
            }
            let mut line = src.split_to(newline_pos + 1);
            line.truncate(newline_pos); // drop the '\n'
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let s = String::from_utf8_lossy(&line).into_owned();
            return Ok(Some(s));
        }

        if src.len() > self.max_line_bytes {
            return Err(LineCodecError::LineTooLong {
                max: self.max_line_bytes,
            });
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let line = src.split_to(src.len());
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(None);
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("hello\n");
        let line = codec.decode(&mut buf).unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_crlf_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("hello\r\n");
        let line = codec.decode(&mut buf).unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
    }

    #[test]
    fn partial_line_yields_none() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("hel");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn multiple_lines_decode_one_at_a_time() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("one\ntwo\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("one"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("two"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut codec = LineCodec::with_max_line_bytes(8);
        let mut buf = BytesMut::from("this line is way too long\n");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, LineCodecError::LineTooLong { max: 8 }));
    }

    #[test]
    fn oversized_incomplete_line_is_rejected_before_newline_arrives() {
        let mut codec = LineCodec::with_max_line_bytes(4);
        let mut buf = BytesMut::from("12345");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, LineCodecError::LineTooLong { max: 4 }));
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("hi".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"hi\n");
    }

    #[test]
    fn decode_eof_returns_trailing_partial_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("trailing-no-newline");
        let line = codec.decode_eof(&mut buf).unwrap();
        assert_eq!(line.as_deref(), Some("trailing-no-newline"));
    }
}
