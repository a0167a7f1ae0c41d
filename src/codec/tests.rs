//! Unit tests for [`FrameDecoder`] driving the fixed-header codec.
//!
//! Covers header/body split points, coalesced frames, zero-length bodies,
//! malformed headers, and the `tokio_util` decoder adapter.

use bytes::{Bytes, BytesMut};
use rstest::{fixture, rstest};
use tokio_util::codec::{Decoder, Encoder};

use super::*;

mod property;

#[fixture]
fn codec() -> FixedHeaderCodec { FixedHeaderCodec::default() }

fn encoded(codec: &FixedHeaderCodec, body: &[u8]) -> Vec<u8> {
    codec.frame(body).expect("frame body").to_vec()
}

#[rstest]
fn single_frame_round_trips(codec: FixedHeaderCodec) {
    let wire = encoded(&codec, b"Hello World");
    let mut decoder = FrameDecoder::new(codec);

    let filtered = decoder
        .filter(&wire)
        .expect("decode")
        .expect("complete frame");

    assert_eq!(filtered.message, Bytes::from_static(b"Hello World"));
    assert_eq!(filtered.consumed, 15);
    assert_eq!(decoder.state(), DecodeState::default());
}

#[rstest]
#[case::one_byte(1)]
#[case::two_bytes(2)]
#[case::three_bytes(3)]
fn split_header_waits_for_rest(codec: FixedHeaderCodec, #[case] split: usize) {
    let wire = encoded(&codec, b"split");
    let mut decoder = FrameDecoder::new(codec);

    assert!(decoder.filter(&wire[..split]).expect("partial header").is_none());
    assert!(!decoder.state().header_parsed());

    let filtered = decoder.filter(&wire).expect("decode").expect("frame");
    assert_eq!(filtered.message, Bytes::from_static(b"split"));
}

#[rstest]
fn split_body_keeps_header_state(codec: FixedHeaderCodec) {
    let wire = encoded(&codec, b"payload");
    let mut decoder = FrameDecoder::new(codec);

    assert!(decoder.filter(&wire[..6]).expect("partial body").is_none());
    assert!(decoder.state().header_parsed());
    assert_eq!(decoder.state().pending_body_size(), 7);

    let filtered = decoder.filter(&wire).expect("decode").expect("frame");
    assert_eq!(filtered.message, Bytes::from_static(b"payload"));
    assert_eq!(filtered.consumed, wire.len());
}

#[rstest]
fn zero_length_body_is_header_only(codec: FixedHeaderCodec) {
    let wire = encoded(&codec, b"");
    assert_eq!(wire, vec![0, 0, 0, 0]);
    let mut decoder = FrameDecoder::new(codec);

    let filtered = decoder.filter(&wire).expect("decode").expect("frame");
    assert!(filtered.message.is_empty());
    assert_eq!(filtered.consumed, 4);
    assert!(!decoder.state().header_parsed());
}

#[rstest]
fn coalesced_frames_decode_in_order(codec: FixedHeaderCodec) {
    let mut wire = encoded(&codec, b"first");
    wire.extend(encoded(&codec, b""));
    wire.extend(encoded(&codec, b"third"));
    let total = wire.len();
    let mut decoder = FrameDecoder::new(codec);

    let decoded = decoder.filter_all(&wire).expect("decode");

    assert_eq!(
        decoded.messages,
        vec![
            Bytes::from_static(b"first"),
            Bytes::new(),
            Bytes::from_static(b"third"),
        ]
    );
    assert_eq!(decoded.consumed, total);
}

#[rstest]
fn filter_all_leaves_partial_tail(codec: FixedHeaderCodec) {
    let mut wire = encoded(&codec, b"whole");
    let whole = wire.len();
    wire.extend(&encoded(&codec, b"partial")[..5]);
    let mut decoder = FrameDecoder::new(codec);

    let decoded = decoder.filter_all(&wire).expect("decode");

    assert_eq!(decoded.messages, vec![Bytes::from_static(b"whole")]);
    assert_eq!(decoded.consumed, whole);
    assert!(decoder.state().header_parsed());
}

#[rstest]
fn negative_body_size_is_protocol_violation(codec: FixedHeaderCodec) {
    let mut decoder = FrameDecoder::new(codec);
    let wire = [0xff, 0xff, 0xff, 0xff, b'x'];

    let err = decoder.filter_all(&wire).expect_err("negative size must fail");

    assert!(matches!(
        err,
        CodecError::Protocol(ProtocolViolation::NegativeBodySize { declared: -1 })
    ));
}

#[test]
fn oversized_body_is_rejected_before_buffering() {
    let mut decoder = FrameDecoder::new(FixedHeaderCodec::default().body_limit(8));
    let wire = [9, 0, 0, 0];

    let err = decoder.filter(&wire).expect_err("oversized body must fail");

    assert!(matches!(
        err,
        CodecError::Framing(FramingError::OversizedFrame { size: 9, max: 8 })
    ));
}

#[rstest]
fn decoder_adapter_advances_by_consumed(codec: FixedHeaderCodec) {
    let mut encoder = FrameDecoder::new(codec.clone());
    let mut decoder = FrameDecoder::new(codec);
    let mut buf = BytesMut::new();
    encoder
        .encode(Bytes::from_static(b"one"), &mut buf)
        .expect("encode one");
    encoder
        .encode(Bytes::from_static(b"two"), &mut buf)
        .expect("encode two");

    assert_eq!(
        decoder.decode(&mut buf).expect("decode"),
        Some(Bytes::from_static(b"one"))
    );
    assert_eq!(buf.len(), 7);
    assert_eq!(
        decoder.decode(&mut buf).expect("decode"),
        Some(Bytes::from_static(b"two"))
    );
    assert!(buf.is_empty());
    assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
}

#[rstest]
fn decode_eof_reports_truncated_frame(codec: FixedHeaderCodec) {
    let wire = encoded(&codec, b"cut short");
    let mut decoder = FrameDecoder::new(codec);
    let mut buf = BytesMut::from(&wire[..7]);

    let err = decoder.decode_eof(&mut buf).expect_err("truncated frame");

    assert!(matches!(
        err,
        CodecError::Framing(FramingError::TruncatedFrame { buffered: 7 })
    ));
}

#[rstest]
fn decode_eof_on_empty_buffer_is_clean(codec: FixedHeaderCodec) {
    let mut decoder = FrameDecoder::new(codec);
    let mut buf = BytesMut::new();
    assert!(matches!(decoder.decode_eof(&mut buf), Ok(None)));
}

#[test]
fn reset_discards_parsed_header() {
    let mut decoder = FrameDecoder::new(FixedHeaderCodec::default());
    assert!(decoder.filter(&[3, 0, 0, 0, b'a']).expect("partial").is_none());
    assert!(decoder.state().header_parsed());

    decoder.reset();

    assert_eq!(decoder.state(), DecodeState::default());
}
