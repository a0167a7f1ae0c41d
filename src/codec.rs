//! Pluggable length-prefixed framing.
//!
//! A [`MessageCodec`] describes one wire format: how wide its header is, how
//! to read the body size from that header, and how to turn a complete frame
//! into an application message (and back). [`FrameDecoder`] drives a codec
//! over a growing byte buffer, keeping the partial-parse state between calls
//! so messages split across reads are reassembled without loss.
//!
//! Decoding never consumes bytes implicitly. Every successful
//! [`FrameDecoder::filter`] call reports exactly how many bytes the emitted
//! frame occupied and the caller advances its buffer by that amount.
//!
//! # Error Handling
//!
//! An incomplete frame is reported as `Ok(None)`. A malformed frame is a
//! [`CodecError`] and ends the connection. See the [`error`] module.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub mod error;
mod fixed_header;

pub use error::{CodecError, FramingError, ProtocolViolation};
pub use fixed_header::FixedHeaderCodec;

/// Upper bound on body sizes accepted by any built-in codec (16 MiB).
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum body size for [`FixedHeaderCodec`] (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// One wire format, implemented by the application.
///
/// Codecs are shared between a session's receive loop and its senders, so
/// they must be `Send + Sync`. Parse state lives in [`FrameDecoder`], never
/// in the codec itself; a fresh codec is nevertheless produced for every
/// session through a [`CodecFactory`].
pub trait MessageCodec: Send + Sync + 'static {
    /// Application message produced by decoding.
    type Message: Send + 'static;

    /// Number of header bytes preceding every body.
    fn header_size(&self) -> usize;

    /// Read the body size declared by `header`.
    ///
    /// `header` is exactly [`header_size`](Self::header_size) bytes long. A
    /// negative return value marks the header as malformed.
    fn parse_body_size(&self, header: &[u8]) -> i64;

    /// Build a message from a complete frame (header followed by body).
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the frame cannot be interpreted.
    fn parse_message(&self, frame: &[u8]) -> Result<Self::Message, CodecError>;

    /// Append the framed form of `message` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the message cannot be framed, for example
    /// because it exceeds [`max_body_size`](Self::max_body_size).
    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), CodecError>;

    /// Largest body size this codec accepts.
    fn max_body_size(&self) -> usize { MAX_BODY_SIZE }
}

/// Produces a fresh codec for each session.
pub type CodecFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Result of a successful [`FrameDecoder::filter`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered<M> {
    /// The decoded message.
    pub message: M,
    /// Bytes the frame occupied at the front of the input.
    pub consumed: usize,
}

/// Messages decoded by [`FrameDecoder::filter_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<M> {
    /// Messages in arrival order.
    pub messages: Vec<M>,
    /// Total bytes consumed from the front of the input.
    pub consumed: usize,
}

/// Parse cursor carried between [`FrameDecoder::filter`] calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeState {
    header_parsed: bool,
    pending_body_size: usize,
}

impl DecodeState {
    /// Returns `true` once the current frame's header has been read.
    #[must_use]
    pub const fn header_parsed(&self) -> bool { self.header_parsed }

    /// Body size of the frame being assembled, meaningful only once the
    /// header has been parsed.
    #[must_use]
    pub const fn pending_body_size(&self) -> usize { self.pending_body_size }
}

/// Incremental frame parser driving a [`MessageCodec`].
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use wiresession::codec::{FixedHeaderCodec, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new(FixedHeaderCodec::default());
/// let wire = [5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o'];
///
/// assert!(decoder.filter(&wire[..3]).expect("valid prefix").is_none());
/// let filtered = decoder
///     .filter(&wire)
///     .expect("valid frame")
///     .expect("complete frame");
/// assert_eq!(filtered.message, Bytes::from_static(b"hello"));
/// assert_eq!(filtered.consumed, wire.len());
/// ```
#[derive(Debug)]
pub struct FrameDecoder<C> {
    codec: Arc<C>,
    state: DecodeState,
}

impl<C: MessageCodec> FrameDecoder<C> {
    /// Wrap an owned codec.
    #[must_use]
    pub fn new(codec: C) -> Self { Self::from_shared(Arc::new(codec)) }

    /// Wrap a codec shared with an encoder.
    #[must_use]
    pub fn from_shared(codec: Arc<C>) -> Self {
        Self {
            codec,
            state: DecodeState::default(),
        }
    }

    /// The wrapped codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<C> { &self.codec }

    /// Current parse cursor.
    #[must_use]
    pub fn state(&self) -> DecodeState { self.state }

    /// Clear the parse cursor so the next call starts a fresh header.
    pub fn reset(&mut self) { self.state = DecodeState::default(); }

    /// Decode at most one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame; no
    /// bytes are consumed in that case and the same (extended) buffer should
    /// be presented again once more data arrives. A parsed header is
    /// remembered across such calls.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::NegativeBodySize`] when the header
    /// declares a negative size and [`FramingError::OversizedFrame`] when it
    /// exceeds the codec's maximum. Both are unrecoverable for the stream.
    pub fn filter(&mut self, buf: &[u8]) -> Result<Option<Filtered<C::Message>>, CodecError> {
        let header_size = self.codec.header_size();
        if !self.state.header_parsed {
            let Some(header) = buf.get(..header_size) else {
                return Ok(None);
            };
            let declared = self.codec.parse_body_size(header);
            let body_size = usize::try_from(declared)
                .map_err(|_| ProtocolViolation::NegativeBodySize { declared })?;
            let max = self.codec.max_body_size();
            if body_size > max {
                return Err(FramingError::OversizedFrame {
                    size: body_size,
                    max,
                }
                .into());
            }
            self.state = DecodeState {
                header_parsed: true,
                pending_body_size: body_size,
            };
        }

        let frame_len = header_size.saturating_add(self.state.pending_body_size);
        let Some(frame) = buf.get(..frame_len) else {
            return Ok(None);
        };
        let message = self.codec.parse_message(frame);
        self.reset();
        Ok(Some(Filtered {
            message: message?,
            consumed: frame_len,
        }))
    }

    /// Decode every complete frame at the front of `buf`.
    ///
    /// Trailing bytes belonging to an unfinished frame are left unconsumed.
    ///
    /// # Errors
    ///
    /// Propagates the first [`CodecError`] from [`filter`](Self::filter);
    /// messages decoded before the failure are discarded.
    pub fn filter_all(&mut self, buf: &[u8]) -> Result<Decoded<C::Message>, CodecError> {
        let mut messages = Vec::new();
        let mut consumed = 0;
        while let Some(remaining) = buf.get(consumed..).filter(|rest| !rest.is_empty()) {
            let Some(filtered) = self.filter(remaining)? else {
                break;
            };
            consumed += filtered.consumed;
            messages.push(filtered.message);
        }
        Ok(Decoded { messages, consumed })
    }
}

impl<C: MessageCodec> Decoder for FrameDecoder<C> {
    type Item = C::Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.filter(src)? {
            Some(Filtered { message, consumed }) => {
                src.advance(consumed);
                Ok(Some(message))
            }
            None => {
                let wanted = self.codec.header_size() + self.state.pending_body_size;
                src.reserve(wanted.saturating_sub(src.len()));
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(FramingError::TruncatedFrame {
                buffered: src.len(),
            }
            .into()),
        }
    }
}

impl<C: MessageCodec> Encoder<C::Message> for FrameDecoder<C> {
    type Error = CodecError;

    fn encode(&mut self, item: C::Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.codec.encode(&item, dst)
    }
}

#[cfg(test)]
mod tests;
