//! Fragmentation tests for `FrameReassembler`.
//!
//! The reassembler must yield the same frames however the transport splits
//! the byte stream, so these tests cut a known stream at every offset (and
//! at every pair of offsets) and compare against delivering it whole.

use amqp_wire::protocol::frame::{
    write_body_frame, write_content_header_frame, write_method_frame, HEARTBEAT_FRAME,
};
use amqp_wire::{BasicProperties, FrameReassembler, Method};

type Collected = Vec<(u8, u16, Vec<u8>)>;

fn feed(chunks: &[&[u8]]) -> Collected {
    let mut reassembler = FrameReassembler::default();
    let mut out = Vec::new();
    for chunk in chunks {
        reassembler
            .push(chunk, |f| out.push((f.frame_type, f.channel, f.payload.to_vec())))
            .expect("push must succeed");
    }
    assert!(reassembler.is_idle(), "no partial frame may remain");
    out
}

/// Method + header + body + heartbeat, the shape of a typical delivery.
fn sample_stream() -> Vec<u8> {
    let mut buf = Vec::new();
    write_method_frame(
        &mut buf,
        1,
        &Method::BasicDeliver {
            consumer_tag: "ctag".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "".into(),
            routing_key: "q".into(),
        },
    )
    .unwrap();
    write_content_header_frame(
        &mut buf,
        1,
        3,
        &BasicProperties {
            message_id: Some("m".into()),
            ..Default::default()
        },
    )
    .unwrap();
    write_body_frame(&mut buf, 1, b"xyz");
    buf.extend_from_slice(&HEARTBEAT_FRAME);
    buf
}

#[test]
fn test_stream_delivered_whole_yields_four_frames() {
    let stream = sample_stream();
    let frames = feed(&[stream.as_slice()]);
    let types: Vec<u8> = frames.iter().map(|f| f.0).collect();
    assert_eq!(types, vec![1, 2, 3, 8]);
}

#[test]
fn test_every_single_split_point_yields_same_frames() {
    // Arrange
    let stream = sample_stream();
    let expected = feed(&[stream.as_slice()]);

    // Act / Assert
    for split in 0..=stream.len() {
        let (a, b) = stream.split_at(split);
        assert_eq!(feed(&[a, b]), expected, "split at {split}");
    }
}

#[test]
fn test_every_pair_of_split_points_yields_same_frames() {
    let stream = sample_stream();
    let expected = feed(&[stream.as_slice()]);

    for i in 0..=stream.len() {
        for j in i..=stream.len() {
            let chunks = [&stream[..i], &stream[i..j], &stream[j..]];
            assert_eq!(feed(&chunks), expected, "splits at {i} and {j}");
        }
    }
}

#[test]
fn test_one_byte_at_a_time_yields_same_frames() {
    let stream = sample_stream();
    let expected = feed(&[stream.as_slice()]);
    let chunks: Vec<&[u8]> = stream.chunks(1).collect();
    assert_eq!(feed(&chunks), expected);
}

#[test]
fn test_empty_chunks_are_harmless() {
    let stream = sample_stream();
    let expected = feed(&[stream.as_slice()]);
    let (a, b) = stream.split_at(5);
    let empty: &[u8] = &[];
    assert_eq!(feed(&[empty, a, empty, b, empty]), expected);
}
