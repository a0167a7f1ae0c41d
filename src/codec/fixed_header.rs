//! Fixed-width signed length prefix followed by an opaque body.

use bytes::{Bytes, BytesMut};

use super::{CodecError, DEFAULT_MAX_BODY_SIZE, FramingError, MAX_BODY_SIZE, MessageCodec};
use crate::byte_order::{ByteOrder, MAX_PREFIX_WIDTH, max_signed};

/// Codec for `[header_size bytes: signed body length][body]` frames.
///
/// Messages are the body bytes; the header is stripped on decode and
/// prepended on encode. The default layout is a 4-byte little-endian `i32`
/// prefix. A zero-length body is legal and decodes to an empty message.
///
/// # Examples
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use wiresession::{
///     byte_order::ByteOrder,
///     codec::{FixedHeaderCodec, MessageCodec},
/// };
///
/// let codec = FixedHeaderCodec::default()
///     .header_width(2)
///     .byte_order(ByteOrder::Big);
/// let mut wire = BytesMut::new();
/// codec
///     .encode(&Bytes::from_static(b"hi"), &mut wire)
///     .expect("encode");
/// assert_eq!(&wire[..], &[0, 2, b'h', b'i']);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedHeaderCodec {
    header_size: usize,
    byte_order: ByteOrder,
    max_body_size: usize,
}

impl Default for FixedHeaderCodec {
    fn default() -> Self {
        Self {
            header_size: 4,
            byte_order: ByteOrder::Little,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl FixedHeaderCodec {
    /// Set the header width in bytes, clamped to `1..=8`.
    ///
    /// The maximum body size is re-clamped so it stays representable in the
    /// new width.
    #[must_use]
    pub fn header_width(mut self, size: usize) -> Self {
        self.header_size = size.clamp(1, MAX_PREFIX_WIDTH);
        self.max_body_size = self.clamp_body_size(self.max_body_size);
        self
    }

    /// Set the byte order of the length prefix.
    #[must_use]
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Set the largest accepted body size.
    ///
    /// Values are clamped to [`MAX_BODY_SIZE`] and to what the header width
    /// can express.
    #[must_use]
    pub fn body_limit(mut self, size: usize) -> Self {
        self.max_body_size = self.clamp_body_size(size);
        self
    }

    /// Configured byte order.
    #[must_use]
    pub const fn order(&self) -> ByteOrder { self.byte_order }

    /// Frame `body` into a standalone buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::OversizedFrame`] when `body` exceeds the
    /// configured maximum.
    pub fn frame(&self, body: &[u8]) -> Result<Bytes, CodecError> {
        let mut dst = BytesMut::with_capacity(self.header_size + body.len());
        self.encode_body(body, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_body(&self, body: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
        let oversized = || FramingError::OversizedFrame {
            size: body.len(),
            max: self.max_body_size,
        };
        if body.len() > self.max_body_size {
            return Err(oversized().into());
        }
        let declared = i64::try_from(body.len()).map_err(|_| oversized())?;
        dst.reserve(self.header_size + body.len());
        if !self
            .byte_order
            .write_signed(declared, self.header_size, dst)
        {
            return Err(oversized().into());
        }
        dst.extend_from_slice(body);
        Ok(())
    }

    fn clamp_body_size(&self, size: usize) -> usize {
        let representable = usize::try_from(max_signed(self.header_size)).unwrap_or(usize::MAX);
        size.min(MAX_BODY_SIZE).min(representable)
    }
}

impl MessageCodec for FixedHeaderCodec {
    type Message = Bytes;

    fn header_size(&self) -> usize { self.header_size }

    fn parse_body_size(&self, header: &[u8]) -> i64 {
        // A header this codec cannot read is treated like a negative size.
        self.byte_order.read_signed(header).unwrap_or(-1)
    }

    fn parse_message(&self, frame: &[u8]) -> Result<Self::Message, CodecError> {
        let body = frame
            .get(self.header_size..)
            .ok_or(FramingError::IncompleteHeader {
                have: frame.len(),
                need: self.header_size,
            })?;
        Ok(Bytes::copy_from_slice(body))
    }

    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.encode_body(message, dst)
    }

    fn max_body_size(&self) -> usize { self.max_body_size }
}
