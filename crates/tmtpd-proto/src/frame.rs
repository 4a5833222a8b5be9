//! Wire framing: 4 hex digits of header length, a JSON header, then
//! `DataLen` raw payload bytes.

use serde::Serialize;

use crate::error::{ProtoError, ProtoResult};
use crate::header::Header;

/// Shortest legal JSON header, `{"op":1}`.
pub const MSG_HEADER_MIN_LEN: usize = 8;

/// Longest legal JSON header.
pub const MSG_HEADER_MAX_LEN: usize = 1 << 16;

/// Serializes `head` and frames it with the hex length prefix, followed
/// by `data`.
pub fn pack_msg<T: Serialize>(head: &T, data: &[u8]) -> ProtoResult<Vec<u8>> {
    let head_bytes = serde_json::to_vec(head)?;
    if head_bytes.len() > 0xFFFF {
        return Err(ProtoError::HeaderTooLong {
            len: head_bytes.len(),
        });
    }
    let mut buf = Vec::with_capacity(4 + head_bytes.len() + data.len());
    buf.extend_from_slice(format!("{:04x}", head_bytes.len()).as_bytes());
    buf.extend_from_slice(&head_bytes);
    buf.extend_from_slice(data);
    Ok(buf)
}

/// A request header parsed out of the buffer, along with whatever prefix
/// of its payload has already arrived.
#[derive(Debug)]
pub struct ParsedFrame {
    /// The validated header.
    pub header: Header,
    /// Payload bytes already buffered, at most `header.data_len`.
    pub data: Vec<u8>,
}

/// Incremental frame parser for a connection's reader task.
///
/// The caller reads socket bytes into [`FrameBuf::space`], records them
/// with [`FrameBuf::advance`], and drains complete headers with
/// [`FrameBuf::parse`]. Payload bytes beyond the buffered prefix are the
/// caller's to consume from the stream; [`FrameBuf::release`] then
/// discards the frame and shifts any pipelined successor to the front.
#[derive(Debug)]
pub struct FrameBuf {
    buf: Vec<u8>,
    pos: usize,
    head_end: usize,
}

impl FrameBuf {
    /// Creates a buffer sized for the largest legal header.
    pub fn new() -> FrameBuf {
        FrameBuf {
            buf: vec![0; MSG_HEADER_MAX_LEN + 4],
            pos: 0,
            head_end: 0,
        }
    }

    /// The writable tail of the buffer.
    pub fn space(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    /// Records `n` bytes read into [`FrameBuf::space`].
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Attempts to parse the next header. Returns `Ok(None)` until a full
    /// header is buffered.
    pub fn parse(&mut self) -> ProtoResult<Option<ParsedFrame>> {
        if self.pos < MSG_HEADER_MIN_LEN + 4 {
            return Ok(None);
        }
        if self.head_end == 0 {
            let prefix = std::str::from_utf8(&self.buf[..4]).map_err(|_| ProtoError::LengthBad)?;
            let len = usize::from_str_radix(prefix, 16).unwrap_or(0);
            if len < MSG_HEADER_MIN_LEN {
                return Err(ProtoError::LengthBad);
            }
            self.head_end = len + 4;
        }
        if self.head_end > self.pos {
            return Ok(None);
        }
        let header: Header = serde_json::from_slice(&self.buf[4..self.head_end])
            .map_err(|_| ProtoError::HeaderBad)?;
        if !header.check() {
            return Err(ProtoError::HeaderBad);
        }
        let data_len = header.data_len as usize;
        let avail = self.pos.min(self.head_end + data_len);
        let data = self.buf[self.head_end..avail].to_vec();
        Ok(Some(ParsedFrame { header, data }))
    }

    /// Discards the parsed frame, given its declared payload length. Any
    /// bytes of a pipelined next frame move to the buffer front.
    pub fn release(&mut self, data_len: usize) {
        let frame_end = self.head_end + data_len;
        if self.pos > frame_end {
            self.buf.copy_within(frame_end..self.pos, 0);
            self.pos -= frame_end;
        } else {
            self.pos = 0;
        }
        self.head_end = 0;
    }
}

impl Default for FrameBuf {
    fn default() -> FrameBuf {
        FrameBuf::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(fb: &mut FrameBuf, bytes: &[u8]) {
        fb.space()[..bytes.len()].copy_from_slice(bytes);
        fb.advance(bytes.len());
    }

    #[test]
    fn pack_prefixes_hex_length() {
        let buf = pack_msg(&json!({"op":"ack"}), b"xy").unwrap();
        assert_eq!(&buf[..4], b"000c");
        assert_eq!(&buf[4..16], br#"{"op":"ack"}"#);
        assert_eq!(&buf[16..], b"xy");
    }

    #[test]
    fn parses_a_complete_frame() {
        let mut fb = FrameBuf::new();
        feed(&mut fb, br#"0009{"Op":10}"#);
        let frame = fb.parse().unwrap().expect("frame");
        assert_eq!(frame.header.op, Some(10));
        assert!(frame.data.is_empty());
        fb.release(0);
        assert!(fb.parse().unwrap().is_none());
    }

    #[test]
    fn short_read_yields_none_until_complete() {
        let mut fb = FrameBuf::new();
        feed(&mut fb, br#"0028{"Op":8,"Id":"p","#);
        assert!(fb.parse().unwrap().is_none());
        feed(&mut fb, br#""To":"ali","DataLen":1}"#);
        let frame = fb.parse().unwrap().expect("frame completes");
        assert_eq!(frame.header.to, "ali");
        assert!(frame.data.is_empty());
    }

    #[test]
    fn buffered_payload_prefix_is_returned() {
        let mut fb = FrameBuf::new();
        let head = br#"{"Op":8,"Id":"p","To":"ali","DataLen":5}"#;
        let mut bytes = format!("{:04x}", head.len()).into_bytes();
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(b"hel");
        feed(&mut fb, &bytes);
        let frame = fb.parse().unwrap().expect("frame");
        assert_eq!(frame.data, b"hel");
    }

    #[test]
    fn pipelined_frames_survive_release() {
        let mut fb = FrameBuf::new();
        let mut bytes = Vec::new();
        for _ in 0..2 {
            bytes.extend_from_slice(br#"0009{"Op":10}"#);
        }
        feed(&mut fb, &bytes);
        assert!(fb.parse().unwrap().is_some());
        fb.release(0);
        assert!(fb.parse().unwrap().is_some());
        fb.release(0);
        assert!(fb.parse().unwrap().is_none());
    }

    #[test]
    fn bad_length_prefix_errors() {
        let mut fb = FrameBuf::new();
        feed(&mut fb, br#"zzzz{"Op":10}"#);
        assert!(matches!(fb.parse(), Err(ProtoError::LengthBad)));

        let mut fb = FrameBuf::new();
        feed(&mut fb, br#"0002{}xxxxxx"#);
        assert!(matches!(fb.parse(), Err(ProtoError::LengthBad)));
    }

    #[test]
    fn bad_header_json_errors() {
        let mut fb = FrameBuf::new();
        feed(&mut fb, br#"0009{"Op":xx}"#);
        assert!(matches!(fb.parse(), Err(ProtoError::HeaderBad)));
    }
}
