//! Property tests for packet framing.
//!
//! Any sequence of packets, concatenated and fed to the decoder in any
//! chunking, must come back out whole, unmodified, and in order.

use proptest::prelude::*;
use tether_buffer::{Buffer, PoolConfig, buffer_pool};
use tether_transport::{FrameDecoder, FrameStatus};

fn encode(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Buffer::new();
    buf.begin_packet(kind).write_bytes(payload);
    buf.end_packet().unwrap();
    buf.as_slice().to_vec()
}

fn packets() -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec(
        (any::<u8>(), prop::collection::vec(any::<u8>(), 0..300)),
        0..20,
    )
}

/// Splits `stream` at the given cut points.
fn chunks(stream: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts
        .iter()
        .map(|c| if stream.is_empty() { 0 } else { c % stream.len() })
        .collect();
    points.push(0);
    points.push(stream.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| stream[w[0]..w[1]].to_vec()).collect()
}

proptest! {
    #[test]
    fn prop_any_chunking_yields_the_original_packets(
        packets in packets(),
        cuts in prop::collection::vec(any::<usize>(), 0..40),
    ) {
        let expected: Vec<Vec<u8>> = packets.iter().map(|(k, p)| encode(*k, p)).collect();
        let stream = expected.concat();
        let pool = buffer_pool(PoolConfig::default());
        let mut decoder = FrameDecoder::new(pool.clone(), 1 << 20);
        let mut out = Vec::new();

        for chunk in chunks(&stream, &cuts) {
            prop_assert_eq!(decoder.push(&chunk, &mut out).unwrap(), FrameStatus::Open);
        }

        let got: Vec<Vec<u8>> = out.iter().map(|b| b.as_slice().to_vec()).collect();
        prop_assert_eq!(got, expected);
        prop_assert!(decoder.is_idle());

        drop(out);
        prop_assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn prop_one_byte_at_a_time_yields_the_original_packets(packets in packets()) {
        let expected: Vec<Vec<u8>> = packets.iter().map(|(k, p)| encode(*k, p)).collect();
        let stream = expected.concat();
        let mut decoder = FrameDecoder::new(buffer_pool(PoolConfig::default()), 1 << 20);
        let mut out = Vec::new();

        for byte in &stream {
            decoder.push(std::slice::from_ref(byte), &mut out).unwrap();
        }

        let got: Vec<Vec<u8>> = out.iter().map(|b| b.as_slice().to_vec()).collect();
        prop_assert_eq!(got, expected);
    }
}
