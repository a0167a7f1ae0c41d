//! Byte-order handling for length prefixes.
//!
//! Length headers are signed integers between one and eight bytes wide. A
//! negative value decoded from a header is reported as-is so the codec can
//! reject it as a protocol violation.

use bytes::{Buf, BufMut};

/// Widest supported length prefix, in bytes.
pub const MAX_PREFIX_WIDTH: usize = 8;

/// Byte order used to encode a length prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first (network order).
    Big,
}

impl ByteOrder {
    /// Decode a signed integer occupying all of `bytes`.
    ///
    /// Returns `None` when `bytes` is empty or wider than
    /// [`MAX_PREFIX_WIDTH`].
    ///
    /// # Examples
    ///
    /// ```
    /// use wiresession::byte_order::ByteOrder;
    ///
    /// assert_eq!(ByteOrder::Little.read_signed(&[0x0b, 0, 0, 0]), Some(11));
    /// assert_eq!(ByteOrder::Big.read_signed(&[0, 0, 0, 0x0b]), Some(11));
    /// assert_eq!(ByteOrder::Little.read_signed(&[0xff, 0xff, 0xff, 0xff]), Some(-1));
    /// ```
    #[must_use]
    pub fn read_signed(self, bytes: &[u8]) -> Option<i64> {
        let width = bytes.len();
        if width == 0 || width > MAX_PREFIX_WIDTH {
            return None;
        }
        let mut cursor = bytes;
        let raw = match self {
            Self::Little => cursor.get_uint_le(width),
            Self::Big => cursor.get_uint(width),
        };
        Some(sign_extend(raw, width))
    }

    /// Append `value` as a `width`-byte signed integer.
    ///
    /// Returns `false` without writing when `width` is unsupported or `value`
    /// does not fit.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use wiresession::byte_order::ByteOrder;
    ///
    /// let mut buf = BytesMut::new();
    /// assert!(ByteOrder::Little.write_signed(11, 4, &mut buf));
    /// assert_eq!(&buf[..], &[0x0b, 0, 0, 0]);
    /// ```
    pub fn write_signed<B: BufMut>(self, value: i64, width: usize, dst: &mut B) -> bool {
        if width == 0 || width > MAX_PREFIX_WIDTH || value > max_signed(width) {
            return false;
        }
        match self {
            Self::Little => dst.put_int_le(value, width),
            Self::Big => dst.put_int(value, width),
        }
        true
    }
}

/// Largest positive value representable in a `width`-byte signed integer.
#[must_use]
pub const fn max_signed(width: usize) -> i64 {
    if width == 0 {
        0
    } else if width >= MAX_PREFIX_WIDTH {
        i64::MAX
    } else {
        (1_i64 << (width * 8 - 1)) - 1
    }
}

#[expect(
    clippy::cast_possible_wrap,
    reason = "reinterpreting the shifted bits as signed performs the sign extension"
)]
fn sign_extend(raw: u64, width: usize) -> i64 {
    let shift = u32::try_from((MAX_PREFIX_WIDTH - width) * 8).unwrap_or(0);
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ByteOrder::Little, &[0x0b, 0x00, 0x00, 0x00], 11)]
    #[case(ByteOrder::Big, &[0x00, 0x00, 0x00, 0x0b], 11)]
    #[case(ByteOrder::Little, &[0xff, 0xff, 0xff, 0xff], -1)]
    #[case(ByteOrder::Little, &[0x00, 0x00, 0x00, 0x80], i64::from(i32::MIN))]
    #[case(ByteOrder::Big, &[0x80, 0x00], i64::from(i16::MIN))]
    #[case(ByteOrder::Little, &[0x7f], 127)]
    fn reads_signed_prefixes(#[case] order: ByteOrder, #[case] bytes: &[u8], #[case] expected: i64) {
        assert_eq!(order.read_signed(bytes), Some(expected));
    }

    #[test]
    fn rejects_unsupported_widths() {
        assert_eq!(ByteOrder::Little.read_signed(&[]), None);
        assert_eq!(ByteOrder::Little.read_signed(&[0; 9]), None);
        assert!(!ByteOrder::Big.write_signed(1, 9, &mut BytesMut::new()));
    }

    #[test]
    fn refuses_values_wider_than_prefix() {
        let mut buf = BytesMut::new();
        assert!(!ByteOrder::Little.write_signed(128, 1, &mut buf));
        assert!(buf.is_empty());
        assert!(ByteOrder::Little.write_signed(127, 1, &mut buf));
        assert_eq!(&buf[..], &[0x7f]);
    }

    #[rstest]
    #[case(1, 127)]
    #[case(2, 32_767)]
    #[case(4, i64::from(i32::MAX))]
    #[case(8, i64::MAX)]
    fn max_signed_matches_integer_bounds(#[case] width: usize, #[case] expected: i64) {
        assert_eq!(max_signed(width), expected);
    }
}
