//! Line-delimited frame codec for agent stdio streams.
//!
//! Frames are separated by `\n` only. A trailing `\r` is stripped so agents
//! that emit `\r\n` are accepted, but no other terminator splits a frame:
//! `\r` alone, `U+2028`, and `U+2029` may legally appear inside a JSON
//! string and must not cut a message in half.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_conduit::transport::codec::FrameCodec;
//!
//! let reader = FramedRead::new(child_stdout, FrameCodec::new());
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::AppError;

/// Maximum line length accepted by the decoder: 16 MiB.
///
/// Agents embed whole file contents and tool outputs in single frames, so
/// the cap is generous; it exists to stop an unterminated stream from
/// growing the buffer without bound.
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// One decoded unit from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line, without its terminator. Invalid UTF-8 is replaced
    /// with `U+FFFD` rather than failing the stream.
    Text(String),
    /// A line longer than the configured maximum was discarded.
    TooLong {
        /// Bytes dropped, counted up to the terminating newline.
        discarded: usize,
    },
}

/// Newline-delimited codec that never fails on content.
///
/// Unlike [`tokio_util::codec::LinesCodec`], decoding never returns an
/// error for oversized or non-UTF-8 input: a `FramedRead` stops for good
/// after its codec errors once, and one bad frame must not end the
/// connection. Only genuine I/O errors terminate the stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_length: usize,
    next_index: usize,
    discarding: Option<usize>,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom maximum line length.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_text(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for FrameCodec {
    type Item = Line;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, AppError> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (Some(dropped), Some(idx)) => {
                    src.advance(idx + 1);
                    self.discarding = None;
                    self.next_index = 0;
                    return Ok(Some(Line::TooLong {
                        discarded: dropped + idx,
                    }));
                }
                (Some(dropped), None) => {
                    src.advance(read_to);
                    self.discarding = Some(dropped + read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (None, Some(idx)) => {
                    self.next_index = 0;
                    let line = src.split_to(idx + 1);
                    return Ok(Some(Line::Text(to_text(&line[..idx]))));
                }
                (None, None) if src.len() > self.max_length => {
                    self.discarding = Some(0);
                }
                (None, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, AppError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if let Some(dropped) = self.discarding.take() {
            let discarded = dropped + src.len();
            src.clear();
            self.next_index = 0;
            return Ok(Some(Line::TooLong { discarded }));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // Unterminated final line: deliver what arrived.
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(Line::Text(to_text(&line))))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), AppError> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
