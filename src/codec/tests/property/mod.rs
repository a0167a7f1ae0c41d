//! Generated checks for [`FrameDecoder`] split and coalescing behaviour.
//!
//! Each check feeds an encoded byte stream to the decoder in two pieces, the
//! way a socket might deliver it, and asserts that exactly the original
//! messages come out with every byte accounted for.

use bytes::Bytes;
use proptest::{
    prelude::{Strategy, any},
    prop_assert,
    prop_assert_eq,
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestCaseError, TestRng, TestRunner},
};

use crate::codec::{CodecError, FixedHeaderCodec, FrameDecoder, MessageCodec};

const HEADER: usize = 4;

fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

fn encode(text: &str) -> Result<Vec<u8>, TestCaseError> {
    FixedHeaderCodec::default()
        .frame(text.as_bytes())
        .map(|bytes| bytes.to_vec())
        .map_err(|err| TestCaseError::fail(format!("encode failed: {err}")))
}

/// Feed `first`, then `first ++ second` minus whatever was consumed, the way
/// the receive loop re-presents its buffer after each read.
fn feed_in_two(first: &[u8], second: &[u8]) -> Result<(usize, Vec<Bytes>, usize), TestCaseError> {
    let mut decoder = FrameDecoder::new(FixedHeaderCodec::default());
    let fail = |err: CodecError| TestCaseError::fail(format!("decode failed: {err}"));

    let mut buffer = first.to_vec();
    let early = decoder.filter_all(&buffer).map_err(fail)?;
    buffer.drain(..early.consumed);
    buffer.extend_from_slice(second);
    let late = decoder.filter_all(&buffer).map_err(fail)?;

    let mut messages = early.messages;
    let early_count = messages.len();
    messages.extend(late.messages);
    Ok((early_count, messages, early.consumed + late.consumed))
}

#[test]
fn any_string_round_trips() {
    let mut runner = deterministic_runner(256);
    runner
        .run(&any::<String>(), |text| {
            let wire = encode(&text)?;
            let mut decoder = FrameDecoder::new(FixedHeaderCodec::default());
            let decoded = decoder
                .filter_all(&wire)
                .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?;
            prop_assert_eq!(decoded.messages, vec![Bytes::from(text.clone())]);
            prop_assert_eq!(decoded.consumed, wire.len());
            Ok(())
        })
        .expect("every string should round-trip");
}

#[test]
fn split_header_yields_nothing_then_one() {
    let mut runner = deterministic_runner(192);
    let strategy = (any::<String>(), 1..HEADER);
    runner
        .run(&strategy, |(text, split)| {
            let wire = encode(&text)?;
            let (head, tail) = wire.split_at(split);
            let (early, messages, consumed) = feed_in_two(head, tail)?;
            prop_assert_eq!(early, 0);
            prop_assert_eq!(messages, vec![Bytes::from(text.clone())]);
            prop_assert_eq!(consumed, wire.len());
            Ok(())
        })
        .expect("split headers should reassemble");
}

#[test]
fn split_body_yields_nothing_then_one() {
    let mut runner = deterministic_runner(192);
    let strategy = any::<String>()
        .prop_filter("body must be non-empty", |text| !text.is_empty())
        .prop_flat_map(|text| {
            let len = text.len();
            (proptest::strategy::Just(text), HEADER..HEADER + len)
        });
    runner
        .run(&strategy, |(text, split)| {
            let wire = encode(&text)?;
            let (head, tail) = wire.split_at(split);
            let (early, messages, consumed) = feed_in_two(head, tail)?;
            prop_assert_eq!(early, 0);
            prop_assert_eq!(messages, vec![Bytes::from(text.clone())]);
            prop_assert_eq!(consumed, wire.len());
            Ok(())
        })
        .expect("split bodies should reassemble");
}

#[test]
fn coalesced_pair_yields_both_in_order() {
    let mut runner = deterministic_runner(192);
    runner
        .run(&(any::<String>(), any::<String>()), |(first, second)| {
            let mut wire = encode(&first)?;
            wire.extend(encode(&second)?);
            let (early, messages, consumed) = feed_in_two(&wire, &[])?;
            prop_assert_eq!(early, 2);
            prop_assert_eq!(
                messages,
                vec![Bytes::from(first.clone()), Bytes::from(second.clone())]
            );
            prop_assert_eq!(consumed, wire.len());
            Ok(())
        })
        .expect("coalesced frames should both decode");
}

#[test]
fn arbitrary_split_of_pair_preserves_order_and_length() {
    let mut runner = deterministic_runner(256);
    let strategy = (any::<String>(), any::<String>()).prop_flat_map(|(first, second)| {
        let total = first.len() + second.len() + 2 * HEADER;
        (
            proptest::strategy::Just(first),
            proptest::strategy::Just(second),
            0..=total,
        )
    });
    runner
        .run(&strategy, |(first, second, split)| {
            let mut wire = encode(&first)?;
            wire.extend(encode(&second)?);
            let (head, tail) = wire.split_at(split);
            let (_, messages, consumed) = feed_in_two(head, tail)?;
            prop_assert_eq!(
                messages,
                vec![Bytes::from(first.clone()), Bytes::from(second.clone())]
            );
            prop_assert_eq!(consumed, wire.len());
            Ok(())
        })
        .expect("split pairs should reassemble in order");
}

#[test]
fn negative_sizes_never_emit() {
    let mut runner = deterministic_runner(128);
    runner
        .run(&(i32::MIN..0, any::<Vec<u8>>()), |(size, body)| {
            let mut wire = size.to_le_bytes().to_vec();
            wire.extend(body);
            let mut decoder = FrameDecoder::new(FixedHeaderCodec::default());
            let result = decoder.filter_all(&wire);
            prop_assert!(
                matches!(&result, Err(err) if err.is_protocol_violation()),
                "expected protocol violation, got {result:?}"
            );
            prop_assert_eq!(decoder.codec().header_size(), HEADER);
            Ok(())
        })
        .expect("negative sizes should be rejected");
}
