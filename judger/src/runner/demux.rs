//! Decoding of the multiplexed log stream produced by a sandbox.
//!
//! The stream is a sequence of frames, each laid out as
//!
//! ```text
//! +------+---------+-----------------+-------------------+
//! | kind | 3 x 0u8 | length (u32 BE) | `length` bytes... |
//! +------+---------+-----------------+-------------------+
//! ```
//!
//! A single run usually spans many frames (one per write on the engine's
//! side), so every frame header must be parsed. Only stripping the first
//! header corrupts any output longer than one write.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Which stream a frame's payload was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    StdIn,
    StdOut,
    StdErr,
}

impl StreamKind {
    pub fn tag(self) -> u8 {
        match self {
            StreamKind::StdIn => 0,
            StreamKind::StdOut => 1,
            StreamKind::StdErr => 2,
        }
    }
}

/// Append one frame carrying `payload` to `buf`.
pub fn encode_frame(buf: &mut BytesMut, kind: StreamKind, payload: &[u8]) {
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u8(kind.tag());
    buf.put_slice(&[0, 0, 0]);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Split `buf` into its complete frames, returning `(tag, payload)` pairs.
///
/// Parsing stops at the first incomplete header or payload; everything before
/// it is still returned.
pub fn frames(buf: &[u8]) -> Vec<(u8, &[u8])> {
    let mut res = Vec::new();
    let mut rest = buf;
    while rest.len() >= HEADER_LEN {
        let tag = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = &rest[HEADER_LEN..];
        if body.len() < len {
            tracing::debug!(
                expected = len,
                available = body.len(),
                "Truncated frame payload, stopping"
            );
            break;
        }
        res.push((tag, &body[..len]));
        rest = &body[len..];
    }
    if !rest.is_empty() && rest.len() < HEADER_LEN {
        tracing::debug!(remaining = rest.len(), "Truncated frame header, stopping");
    }
    res
}

/// Decode the framed buffer into plain text, concatenating every payload in
/// order regardless of which stream it belongs to.
pub fn decode(buf: &[u8]) -> String {
    let mut text = Vec::with_capacity(buf.len());
    for (_, payload) in frames(buf) {
        text.extend_from_slice(payload);
    }
    String::from_utf8_lossy(&text).into_owned()
}

/// Frames built one payload at a time, used when the runtime hands us already
/// separated chunks.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: StreamKind, payload: &[u8]) {
        encode_frame(&mut self.buf, kind, payload)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn framed(parts: &[(StreamKind, &str)]) -> Bytes {
        let mut w = FrameWriter::new();
        for (kind, s) in parts {
            w.push(*kind, s.as_bytes());
        }
        w.finish()
    }

    #[test]
    fn test_decode_no_frames() {
        assert_eq!(decode(&[]), "");
    }

    #[test]
    fn test_decode_single_frame() {
        let buf = framed(&[(StreamKind::StdOut, "[{\"a\":1}]\n")]);
        assert_eq!(buf.len(), HEADER_LEN + 10);
        assert_eq!(decode(&buf), "[{\"a\":1}]\n");
    }

    #[test]
    fn test_decode_many_frames_keeps_order() {
        let buf = framed(&[
            (StreamKind::StdOut, "[{\"x\":1},\n"),
            (StreamKind::StdErr, "warning\n"),
            (StreamKind::StdOut, "{\"x\":2}]\n"),
        ]);
        assert_eq!(decode(&buf), "[{\"x\":1},\nwarning\n{\"x\":2}]\n");
    }

    #[test]
    fn test_decode_empty_payload_frame() {
        let buf = framed(&[(StreamKind::StdOut, ""), (StreamKind::StdOut, "ok")]);
        assert_eq!(decode(&buf), "ok");
    }

    #[test]
    fn test_decode_truncated_header() {
        let mut buf = BytesMut::from(&framed(&[(StreamKind::StdOut, "first")])[..]);
        buf.extend_from_slice(&[1, 0, 0]);
        assert_eq!(decode(&buf), "first");
    }

    #[test]
    fn test_decode_truncated_payload() {
        let full = framed(&[(StreamKind::StdOut, "first"), (StreamKind::StdOut, "second")]);
        let cut = &full[..full.len() - 3];
        assert_eq!(decode(cut), "first");
    }

    #[test]
    fn test_decode_does_not_strip_fixed_offset_only() {
        // Both headers must disappear from the text, not just the first one.
        let buf = framed(&[(StreamKind::StdOut, "ab"), (StreamKind::StdOut, "cd")]);
        let text = decode(&buf);
        assert_eq!(text, "abcd");
        assert!(!text.contains('\u{0}'));
    }

    #[test]
    fn test_frames_reports_tags() {
        let buf = framed(&[(StreamKind::StdErr, "e"), (StreamKind::StdOut, "o")]);
        let tags: Vec<u8> = frames(&buf).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec![2, 1]);
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, StreamKind::StdOut, &[0x66, 0xff, 0x6f]);
        assert_eq!(decode(&buf), "f\u{fffd}o");
    }
}
