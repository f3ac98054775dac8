//! Property tests for the line codec under arbitrary read chunking.

use posestream::protocol::{self, LineBuffer};
use proptest::prelude::*;

/// Lines without newlines; may be blank, padded, or contain multi-byte characters.
fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ a-zA-Z0-9{}\\[\\]:,\"._-]{0,40}",
        "[ \\t]{0,3}[éü→😀a-z]{1,8}[ \\t]{0,3}",
    ]
}

proptest! {
    #[test]
    fn feed_recovers_lines_for_any_chunking(
        lines in prop::collection::vec(line_strategy(), 0..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30),
    ) {
        let mut stream = Vec::new();
        for line in &lines {
            stream.extend_from_slice(line.as_bytes());
            stream.push(b'\n');
        }

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
        offsets.push(0);
        offsets.push(stream.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut buffer = LineBuffer::new();
        let mut got = Vec::new();
        for pair in offsets.windows(2) {
            got.extend(buffer.feed(&stream[pair[0]..pair[1]]));
        }

        let expected: Vec<String> = lines
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        prop_assert_eq!(got, expected);
        prop_assert!(buffer.pending().is_empty());
    }

    #[test]
    fn unterminated_tail_is_retained(head in "[a-z]{1,10}", tail in "[a-z]{1,10}") {
        let input = format!("{}\n{}", head, tail);
        let (messages, rest) = protocol::feed(Vec::new(), input.as_bytes());
        prop_assert_eq!(messages, vec![head]);
        prop_assert_eq!(rest, tail.into_bytes());
    }

    #[test]
    fn frame_header_matches_payload_len(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let frame = protocol::encode_frame(&payload).unwrap();
        prop_assert_eq!(frame.len(), payload.len() + protocol::FRAME_HEADER_LEN);
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(len, payload.len());

        let mut reader = std::io::Cursor::new(frame);
        let decoded = protocol::read_frame(&mut reader, protocol::MAX_FRAME_LEN).unwrap();
        prop_assert_eq!(decoded, payload);
    }
}
