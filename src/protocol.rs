use crate::types::{Intrinsics, PoseUpdate, ProtocolVersion, RecordShape};
use crate::{PoseStreamError, Result};
use serde::Deserialize;
use std::io::Read;

// -- Wire constants --
pub const HANDSHAKE_OK: &str = "HANDSHAKE_OK";
pub const LINE_TERMINATOR: u8 = b'\n';
pub const FRAME_HEADER_LEN: usize = 4;

/// Absolute ceiling for one binary frame. Sessions may configure a lower one.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Build a length-prefixed binary frame: `[u32 BE length][payload]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(PoseStreamError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read one length-prefixed frame (estimator side of the image channel).
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(PoseStreamError::StreamClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(PoseStreamError::PayloadTooLarge { len, max: max_len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Default cap on one text line before it is discarded.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Split newly received bytes into complete, trimmed, non-empty lines.
///
/// `buffer` must be the remainder returned by the previous call (or empty):
/// it never holds a terminator, so only `new_bytes` are scanned. Splitting
/// happens on raw bytes so a UTF-8 sequence broken across two reads is
/// reassembled before decoding.
pub fn feed(mut buffer: Vec<u8>, new_bytes: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut scan_from = buffer.len();
    buffer.extend_from_slice(new_bytes);

    let mut messages = Vec::new();
    let mut consumed = 0;
    while let Some(pos) = buffer[scan_from..]
        .iter()
        .position(|&b| b == LINE_TERMINATOR)
    {
        let end = scan_from + pos;
        let line = String::from_utf8_lossy(&buffer[consumed..end]);
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            messages.push(trimmed.to_string());
        }
        consumed = end + 1;
        scan_from = consumed;
    }
    buffer.drain(..consumed);
    (messages, buffer)
}

/// Stateful wrapper around [`feed`] owned by the receive loop.
///
/// Lines longer than `max_len` bytes are dropped. An unterminated tail that
/// grows past the cap is released and everything up to the next newline is
/// skipped, so memory stays bounded against a peer that never terminates.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
    discarding: bool,
    overflowed: u64,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len: max_len.max(1),
            discarding: false,
            overflowed: 0,
        }
    }

    pub fn feed(&mut self, mut new_bytes: &[u8]) -> Vec<String> {
        if self.discarding {
            match new_bytes.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(pos) => {
                    new_bytes = &new_bytes[pos + 1..];
                    self.discarding = false;
                }
                None => return Vec::new(),
            }
        }

        let (mut messages, rest) = feed(std::mem::take(&mut self.pending), new_bytes);
        let complete = messages.len();
        messages.retain(|m| m.len() <= self.max_len);
        self.overflowed += (complete - messages.len()) as u64;

        if rest.len() > self.max_len {
            log::debug!(
                "Discarding unterminated line over {} bytes",
                self.max_len
            );
            self.overflowed += 1;
            self.discarding = true;
        } else {
            self.pending = rest;
        }
        messages
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Number of overlong lines dropped since the last call.
    pub fn take_overflowed(&mut self) -> u64 {
        std::mem::take(&mut self.overflowed)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }
}

#[derive(Deserialize)]
struct CornerRecord {
    #[serde(default)]
    id: String,
    corner0: [f64; 2],
    corner1: [f64; 2],
    corner2: [f64; 2],
    corner3: [f64; 2],
}

#[derive(Deserialize)]
struct VectorRecord {
    #[serde(default)]
    id: String,
    tvec: [f64; 3],
    rvec: [f64; 3],
}

/// Decode one trimmed text line into a [`PoseUpdate`] of the active shape.
///
/// The handshake sentinel is accepted regardless of shape. Anything else
/// that is not a complete, fully numeric record of `shape` is a
/// [`PoseStreamError::Decode`].
pub fn decode_record(line: &str, shape: RecordShape) -> Result<PoseUpdate> {
    let line = line.trim();
    if line == HANDSHAKE_OK {
        return Ok(PoseUpdate::Handshake);
    }

    match shape {
        RecordShape::Corners => {
            let r: CornerRecord = serde_json::from_str(line)
                .map_err(|e| PoseStreamError::Decode(e.to_string()))?;
            Ok(PoseUpdate::Corners {
                id: r.id,
                corners: [r.corner0, r.corner1, r.corner2, r.corner3],
            })
        }
        RecordShape::Vectors => {
            let r: VectorRecord = serde_json::from_str(line)
                .map_err(|e| PoseStreamError::Decode(e.to_string()))?;
            Ok(PoseUpdate::Vectors {
                id: r.id,
                tvec: r.tvec,
                rvec: r.rvec,
            })
        }
    }
}

/// Render the one-shot intrinsics message for the given protocol version.
pub fn format_intrinsics(intrinsics: &Intrinsics, version: ProtocolVersion) -> String {
    let Intrinsics {
        fx,
        fy,
        cx,
        cy,
        width,
        height,
    } = *intrinsics;
    match version {
        ProtocolVersion::Legacy => format!("{:?},{:?},{:?},{:?}", fx, fy, cx, cy),
        ProtocolVersion::Handshake => {
            format!("{:?},{:?},{:?},{:?},{},{}\n", fx, fy, cx, cy, width, height)
        }
    }
}

/// Parse an intrinsics message back into its 4 or 6 numeric fields.
pub fn parse_intrinsics(text: &str) -> Result<Vec<f64>> {
    let fields = text
        .trim()
        .split(',')
        .map(|f| {
            f.trim()
                .parse::<f64>()
                .map_err(|e| PoseStreamError::Decode(format!("intrinsics field {:?}: {}", f, e)))
        })
        .collect::<Result<Vec<f64>>>()?;

    match fields.len() {
        4 | 6 => Ok(fields),
        n => Err(PoseStreamError::Decode(format!(
            "intrinsics message has {} fields, expected 4 or 6",
            n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_header() {
        let payload = [7u8; 10];
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(frame.len(), 14);
        assert_eq!(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]), 10);
        assert_eq!(&frame[4..], &payload);
    }

    #[test]
    fn test_encode_frame_big_endian() {
        let payload = vec![0u8; 0x0102];
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(&frame[..4], &[0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_read_frame() {
        let mut wire = encode_frame(b"jpeg").unwrap();
        wire.extend(encode_frame(b"").unwrap());
        let mut cursor = std::io::Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor, 64).unwrap(), b"jpeg");
        assert!(read_frame(&mut cursor, 64).unwrap().is_empty());
        assert!(matches!(
            read_frame(&mut cursor, 64),
            Err(PoseStreamError::StreamClosed)
        ));
    }

    #[test]
    fn test_read_frame_rejects_oversize() {
        let wire = encode_frame(&[0u8; 32]).unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor, 16),
            Err(PoseStreamError::PayloadTooLarge { len: 32, max: 16 })
        ));
    }

    #[test]
    fn test_feed_keeps_partial_tail() {
        let (msgs, rest) = feed(Vec::new(), b"first\nsec");
        assert_eq!(msgs, vec!["first"]);
        assert_eq!(rest, b"sec");

        let (msgs, rest) = feed(rest, b"ond\n");
        assert_eq!(msgs, vec!["second"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_feed_trims_and_drops_empty() {
        let (msgs, rest) = feed(Vec::new(), b"  a \r\n\n   \n b\n");
        assert_eq!(msgs, vec!["a", "b"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_feed_split_utf8() {
        let text = "{\"id\":\"\u{00e9}\"}\n".as_bytes();
        // Break inside the two-byte 'é'
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut lines = LineBuffer::new();
        assert!(lines.feed(&text[..split]).is_empty());
        assert_eq!(lines.feed(&text[split..]), vec!["{\"id\":\"\u{00e9}\"}"]);
        assert!(lines.pending().is_empty());
    }

    #[test]
    fn test_unterminated_overlong_line_discarded() {
        let mut lines = LineBuffer::with_max_len(8);
        assert!(lines.feed(b"abcdefghijk").is_empty());
        assert!(lines.pending().is_empty());
        assert_eq!(lines.take_overflowed(), 1);

        // Still inside the discarded line until the newline arrives.
        assert!(lines.feed(b"lmnop").is_empty());
        assert!(lines.pending().is_empty());
        assert_eq!(lines.feed(b"xyz\nok\n"), vec!["ok"]);
        assert_eq!(lines.take_overflowed(), 0);
    }

    #[test]
    fn test_complete_overlong_line_dropped() {
        let mut lines = LineBuffer::with_max_len(4);
        assert_eq!(lines.feed(b"toolong\nfine\nab"), vec!["fine"]);
        assert_eq!(lines.pending(), b"ab");
        assert_eq!(lines.take_overflowed(), 1);
        assert_eq!(lines.feed(b"c\n"), vec!["abc"]);
    }

    #[test]
    fn test_vector_record_byte_by_byte() {
        let input = b"{\"id\":\"t\",\"tvec\":[1,2,3],\"rvec\":[0,0,0]}\n";
        let mut lines = LineBuffer::new();
        let mut decoded = Vec::new();
        for b in input.iter() {
            for line in lines.feed(std::slice::from_ref(b)) {
                decoded.push(decode_record(&line, RecordShape::Vectors).unwrap());
            }
        }
        assert_eq!(
            decoded,
            vec![PoseUpdate::Vectors {
                id: "t".into(),
                tvec: [1.0, 2.0, 3.0],
                rvec: [0.0, 0.0, 0.0],
            }]
        );
    }

    #[test]
    fn test_decode_corner_record() {
        let line = r#"{"id":"7","corner0":[10,20],"corner1":[30.5,20],"corner2":[30,40],"corner3":[10,40]}"#;
        match decode_record(line, RecordShape::Corners).unwrap() {
            PoseUpdate::Corners { id, corners } => {
                assert_eq!(id, "7");
                assert_eq!(corners[1], [30.5, 20.0]);
                assert_eq!(corners[3], [10.0, 40.0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_handshake_any_shape() {
        assert_eq!(
            decode_record("HANDSHAKE_OK", RecordShape::Corners).unwrap(),
            PoseUpdate::Handshake
        );
        assert_eq!(
            decode_record(" HANDSHAKE_OK ", RecordShape::Vectors).unwrap(),
            PoseUpdate::Handshake
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let bad = [
            "not json",
            r#"{"id":"t","tvec":[1,2],"rvec":[0,0,0]}"#,
            r#"{"id":"t","tvec":[1,"x",3],"rvec":[0,0,0]}"#,
            r#"{"id":"t","tvec":[1,2,3]}"#,
            r#"{"id":"t","tvec":[1,2,3],"rvec":[0,0,0]"#,
        ];
        for line in bad {
            assert!(
                matches!(decode_record(line, RecordShape::Vectors), Err(PoseStreamError::Decode(_))),
                "accepted {}",
                line
            );
        }
    }

    #[test]
    fn test_decode_rejects_other_shape() {
        let line = r#"{"id":"t","tvec":[1,2,3],"rvec":[0,0,0]}"#;
        assert!(decode_record(line, RecordShape::Corners).is_err());
    }

    #[test]
    fn test_intrinsics_roundtrip() {
        let intrinsics = Intrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 50.0,
            cy: 50.0,
            width: 640,
            height: 480,
        };
        let msg = format_intrinsics(&intrinsics, ProtocolVersion::Handshake);
        assert_eq!(msg, "100.0,100.0,50.0,50.0,640,480\n");
        assert_eq!(
            parse_intrinsics(&msg).unwrap(),
            vec![100.0, 100.0, 50.0, 50.0, 640.0, 480.0]
        );

        let legacy = format_intrinsics(&intrinsics, ProtocolVersion::Legacy);
        assert_eq!(legacy, "100.0,100.0,50.0,50.0");
        assert_eq!(parse_intrinsics(&legacy).unwrap().len(), 4);
    }

    #[test]
    fn test_parse_intrinsics_rejects_bad_fields() {
        assert!(parse_intrinsics("1,2,3").is_err());
        assert!(parse_intrinsics("1,2,3,x").is_err());
        assert!(parse_intrinsics("1,2,3,4,5").is_err());
    }
}
