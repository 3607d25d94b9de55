//! Newline framing for agent stdout and stderr.
//!
//! Unlike [`tokio_util::codec::LinesCodec`], framing problems never surface
//! as decoder errors: a `FramedRead` stops yielding after its first error, and
//! one bad line must not end the stream. Invalid UTF-8 is decoded lossily and
//! over-long lines become [`Frame::Oversized`].

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::AppError;

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One framed unit of agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(String),
    /// A line longer than the limit; its bytes were dropped.
    Oversized {
        /// Number of bytes discarded.
        discarded: usize,
    },
}

/// Line codec with a per-line byte ceiling.
#[derive(Debug)]
pub struct AgentCodec {
    max_length: usize,
    /// Bytes already scanned without finding a newline.
    next_index: usize,
    /// Bytes dropped from the current over-long line, if discarding.
    discarding: Option<usize>,
}

impl AgentCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }
}

impl Default for AgentCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            if let Some(dropped) = self.discarding {
                match newline {
                    Some(end) => {
                        src.advance(end + 1);
                        self.next_index = 0;
                        self.discarding = None;
                        return Ok(Some(Frame::Oversized {
                            discarded: dropped + end,
                        }));
                    }
                    None => {
                        let len = src.len();
                        src.advance(len);
                        self.next_index = 0;
                        self.discarding = Some(dropped + len);
                        return Ok(None);
                    }
                }
            }

            match newline {
                Some(end) if end > self.max_length => {
                    src.advance(end + 1);
                    self.next_index = 0;
                    return Ok(Some(Frame::Oversized { discarded: end }));
                }
                Some(end) => {
                    let line = src.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(Frame::Line(to_text(&line[..end]))));
                }
                None if src.len() > self.max_length => {
                    // Start discarding and loop to look for the terminator.
                    self.discarding = Some(0);
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if let Some(dropped) = self.discarding.take() {
            self.next_index = 0;
            return Ok((dropped > 0).then_some(Frame::Oversized { discarded: dropped }));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // Final line without a trailing newline.
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(Frame::Line(to_text(&line))))
    }
}

fn to_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
