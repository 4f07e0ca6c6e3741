//! Line framer for the inbound request stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length. Partial lines are buffered across reads and the trailing partial
//! line is flushed at end of stream. Blank lines never surface.
//!
//! Decoding never fails on bad input: oversized and non-UTF-8 lines come back
//! as [`Frame::Oversized`] and [`Frame::Malformed`] so the caller can answer
//! them and keep reading. Only I/O errors on the underlying stream are
//! returned as errors.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use script_runtime::transport::codec::LineCodec;
//!
//! let frames = FramedRead::new(tokio::io::stdin(), LineCodec::new());
//! ```

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::config::DEFAULT_MAX_LINE_BYTES;
use crate::{AppError, Result};

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, non-blank line without its terminator.
    Line(String),
    /// A line longer than the limit; its bytes are discarded.
    Oversized,
    /// A line that is not valid UTF-8.
    Malformed(String),
}

/// Newline-delimited framer with a maximum line length.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl LineCodec {
    /// Create a codec with the default [`DEFAULT_MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec with an explicit line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    /// Configured line limit.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = AppError;

    /// Decode the next non-blank line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => return Ok(Some(Frame::Line(line))),
                Ok(None) => return Ok(None),
                Err(err) => return map_codec_error(err),
            }
        }
    }

    /// Decode what remains once the stream has ended, including a final
    /// line that has no terminator.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => return Ok(Some(Frame::Line(line))),
                Ok(None) => return Ok(None),
                Err(err) => return map_codec_error(err),
            }
        }
    }
}

/// Turn recoverable codec errors into frames; keep stream I/O errors fatal.
fn map_codec_error(err: LinesCodecError) -> Result<Option<Frame>> {
    match err {
        LinesCodecError::MaxLineLengthExceeded => Ok(Some(Frame::Oversized)),
        LinesCodecError::Io(io_err) if io_err.kind() == ErrorKind::InvalidData => {
            Ok(Some(Frame::Malformed(io_err.to_string())))
        }
        LinesCodecError::Io(io_err) => Err(AppError::Io(io_err.to_string())),
    }
}
