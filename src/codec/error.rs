//! Errors raised while framing and parsing messages.
//!
//! The taxonomy separates wire-level framing problems from protocol
//! violations and transport failures. An *incomplete* frame is never an
//! error: decoders report it as `Ok(None)`.
//!
//! - [`ProtocolViolation`]: the peer sent something no valid frame can contain (for example, a
//!   negative body size).
//! - [`FramingError`]: frame limits or boundaries were exceeded (oversized bodies, truncated frames
//!   at end of stream).
//! - [`CodecError`]: top-level enum wrapping both categories plus I/O errors.
//!
//! Every codec error is fatal for the connection that produced it: length
//! prefixed framing has no resynchronisation marker, so once a header is
//! rejected the remaining bytes cannot be trusted.

use std::io;

use thiserror::Error;

/// Frames that no conforming peer could have produced.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The header declared a body size below zero.
    #[error("header declared a negative body size: {declared}")]
    NegativeBodySize {
        /// Value decoded from the header.
        declared: i64,
    },

    /// The header could not be interpreted as a body size at all.
    #[error("unreadable length header of {width} bytes")]
    UnreadableHeader {
        /// Header width presented to the codec.
        width: usize,
    },

    /// A complete frame could not be parsed into a message.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Human readable description supplied by the codec.
        reason: String,
    },
}

/// Violations of frame size limits or boundaries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Body size exceeds the configured maximum.
    #[error("frame exceeds max body size: {size} > {max}")]
    OversizedFrame {
        /// Body size declared or requested.
        size: usize,
        /// Maximum allowed body size.
        max: usize,
    },

    /// A frame handed to the codec was shorter than its header.
    #[error("incomplete frame header: have {have}, need {need}")]
    IncompleteHeader {
        /// Bytes available.
        have: usize,
        /// Bytes required for the header.
        need: usize,
    },

    /// The stream ended while a frame was partially buffered.
    #[error("stream ended with {buffered} bytes of an unfinished frame")]
    TruncatedFrame {
        /// Bytes left in the buffer at end of stream.
        buffered: usize,
    },
}

/// Any failure of a [`FrameDecoder`](super::FrameDecoder) or codec.
///
/// # Examples
///
/// ```
/// use wiresession::codec::{CodecError, ProtocolViolation};
///
/// let err = CodecError::from(ProtocolViolation::NegativeBodySize { declared: -1 });
/// assert!(err.is_protocol_violation());
/// assert_eq!(err.error_type(), "protocol");
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// A frame limit or boundary was exceeded.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Returns `true` for [`CodecError::Protocol`].
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool { matches!(self, Self::Protocol(_)) }

    /// Short category name, used as a log field.
    ///
    /// One of `"protocol"`, `"framing"`, or `"io"`.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Framing(e @ FramingError::TruncatedFrame { .. }) => {
                io::Error::new(io::ErrorKind::UnexpectedEof, e)
            }
            CodecError::Framing(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CodecError::Protocol(e) => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(
        CodecError::from(ProtocolViolation::NegativeBodySize { declared: -4 }),
        io::ErrorKind::InvalidData
    )]
    #[case(
        CodecError::from(FramingError::OversizedFrame { size: 10, max: 4 }),
        io::ErrorKind::InvalidData
    )]
    #[case(
        CodecError::from(FramingError::TruncatedFrame { buffered: 3 }),
        io::ErrorKind::UnexpectedEof
    )]
    #[case(
        CodecError::from(io::Error::from(io::ErrorKind::ConnectionReset)),
        io::ErrorKind::ConnectionReset
    )]
    fn converts_into_io_error(#[case] err: CodecError, #[case] kind: io::ErrorKind) {
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), kind);
    }

    #[test]
    fn negative_size_message_names_value() {
        let err = CodecError::from(ProtocolViolation::NegativeBodySize { declared: -7 });
        assert!(err.to_string().contains("-7"), "unexpected message: {err}");
    }
}
