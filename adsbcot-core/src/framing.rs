//! Frame extraction from raw Mode S byte streams.
//!
//! Two wire formats are supported:
//!
//! - `raw`: one hex-encoded frame per line, `*8DA9EE47...;`. Lines prefixed
//!   with `@` carry a 12-hex-digit MLAT counter before the frame.
//! - `beast`: binary, each frame introduced by `0x1A` and a type byte
//!   (`'1'` Mode A/C, `'2'` short, `'3'` long), followed by a 6-byte MLAT
//!   counter, one signal byte, and the frame. A literal `0x1A` inside a
//!   frame is doubled.
//!
//! Only 112-bit frames are handed out; anything else is dropped without
//! complaint, since resynchronizing on a noisy socket is routine.

use bytes::{Buf, Bytes, BytesMut};

use crate::types::{hex_decode, LONG_FRAME_BYTES};

const ESCAPE: u8 = 0x1A;

/// MLAT counter plus signal byte ahead of every beast payload.
const BEAST_HEADER: usize = 7;

/// Hex digits of the MLAT counter on an `@` raw line.
const MLAT_HEX_CHARS: usize = 12;

/// A raw line longer than this without a newline is garbage.
const MAX_RAW_LINE: usize = 256;

/// Wire format of a byte-stream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    Raw,
    Beast,
}

impl FramingMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(FramingMode::Raw),
            "beast" => Some(FramingMode::Beast),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FramingMode::Raw => "raw",
            FramingMode::Beast => "beast",
        }
    }

    /// Conventional dump1090 output port.
    pub fn default_port(&self) -> u16 {
        match self {
            FramingMode::Raw => 30002,
            FramingMode::Beast => 30005,
        }
    }
}

/// One extracted 112-bit frame, not yet parity checked.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub data: Bytes,
    /// dBFS, beast only.
    pub signal_level: Option<f64>,
}

enum Extract {
    Frame(RawFrame),
    Skipped,
    Incomplete,
}

/// Accumulates stream bytes and extracts frames as they complete.
pub struct FrameBuffer {
    mode: FramingMode,
    buffer: BytesMut,
    skipped: u64,
}

impl FrameBuffer {
    pub fn new(mode: FramingMode) -> Self {
        FrameBuffer {
            mode,
            buffer: BytesMut::with_capacity(16 * 1024),
            skipped: 0,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Append a chunk and return every long frame it completed. A partial
    /// frame at the end stays buffered for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            let step = match self.mode {
                FramingMode::Raw => self.extract_raw(),
                FramingMode::Beast => self.extract_beast(),
            };
            match step {
                Extract::Frame(frame) => frames.push(frame),
                Extract::Skipped => self.skipped += 1,
                Extract::Incomplete => break,
            }
        }
        frames
    }

    fn extract_raw(&mut self) -> Extract {
        let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.buffer.len() > MAX_RAW_LINE {
                self.buffer.clear();
                return Extract::Skipped;
            }
            return Extract::Incomplete;
        };
        let line = self.buffer.split_to(end + 1);
        match parse_raw_line(&line) {
            Some(data) => Extract::Frame(RawFrame {
                data,
                signal_level: None,
            }),
            None => Extract::Skipped,
        }
    }

    fn extract_beast(&mut self) -> Extract {
        // resync on the next escape byte
        match self.buffer.iter().position(|&b| b == ESCAPE) {
            Some(0) => {}
            Some(n) => {
                self.buffer.advance(n);
                return Extract::Skipped;
            }
            None if self.buffer.is_empty() => return Extract::Incomplete,
            None => {
                self.buffer.clear();
                return Extract::Skipped;
            }
        }
        if self.buffer.len() < 2 {
            return Extract::Incomplete;
        }

        let Some(payload_len) = beast_payload_len(self.buffer[1]) else {
            self.buffer.advance(1);
            return Extract::Skipped;
        };

        let wanted = BEAST_HEADER + payload_len;
        let mut body = Vec::with_capacity(wanted);
        let mut i = 2;
        while body.len() < wanted {
            let Some(&b) = self.buffer.get(i) else {
                return Extract::Incomplete;
            };
            if b != ESCAPE {
                body.push(b);
                i += 1;
                continue;
            }
            match self.buffer.get(i + 1) {
                None => return Extract::Incomplete,
                Some(&ESCAPE) => {
                    body.push(ESCAPE);
                    i += 2;
                }
                // a new frame started before this one finished
                Some(_) => {
                    self.buffer.advance(i);
                    return Extract::Skipped;
                }
            }
        }
        self.buffer.advance(i);

        if payload_len != LONG_FRAME_BYTES {
            return Extract::Skipped;
        }
        Extract::Frame(RawFrame {
            data: Bytes::copy_from_slice(&body[BEAST_HEADER..]),
            signal_level: signal_dbfs(body[BEAST_HEADER - 1]),
        })
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Frames and garbage runs dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn parse_raw_line(line: &[u8]) -> Option<Bytes> {
    let text = std::str::from_utf8(line).ok()?.trim();
    let body = if let Some(rest) = text.strip_prefix('*') {
        rest
    } else if let Some(rest) = text.strip_prefix('@') {
        rest.get(MLAT_HEX_CHARS..)?
    } else {
        text
    };
    let hex = body.strip_suffix(';').unwrap_or(body);
    if hex.len() != LONG_FRAME_BYTES * 2 {
        return None;
    }
    hex_decode(hex).map(Bytes::from)
}

fn beast_payload_len(kind: u8) -> Option<usize> {
    match kind {
        b'1' => Some(2),
        b'2' => Some(7),
        b'3' => Some(LONG_FRAME_BYTES),
        _ => None,
    }
}

/// Beast signal byte to dBFS, one decimal.
fn signal_dbfs(raw: u8) -> Option<f64> {
    if raw == 0 {
        return None;
    }
    let level = raw as f64 / 255.0;
    Some((100.0 * (level * level).log10()).round() / 10.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const IDENT: &str = "8DA9EE47213B7CF954C820605AD9";

    fn beast(kind: u8, payload: &[u8], signal: u8) -> Vec<u8> {
        let mut body = vec![0x00, ESCAPE, 0x02, 0x03, 0x04, 0x05, signal];
        body.extend_from_slice(payload);
        let mut out = vec![ESCAPE, kind];
        for b in body {
            out.push(b);
            if b == ESCAPE {
                out.push(ESCAPE);
            }
        }
        out
    }

    #[test]
    fn test_raw_truncated_then_valid() {
        let mut buf = FrameBuffer::new(FramingMode::Raw);
        let frames = buf.push(format!("*8DA9EE47213B;\n*{IDENT};\n").as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.as_ref(), hex_decode(IDENT).unwrap().as_slice());
        assert_eq!(frames[0].signal_level, None);
        assert_eq!(buf.skipped(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_raw_split_across_pushes() {
        let mut buf = FrameBuffer::new(FramingMode::Raw);
        let line = format!("*{IDENT};\r\n");
        let (a, b) = line.as_bytes().split_at(10);
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.push(b).len(), 1);
    }

    #[test]
    fn test_raw_mlat_prefix_and_garbage() {
        let mut buf = FrameBuffer::new(FramingMode::Raw);
        let input = format!("@0123456789AB{IDENT};\nhello\n*{}ZZ;\n", &IDENT[..26]);
        let frames = buf.push(input.as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(buf.skipped(), 2);
    }

    #[test]
    fn test_raw_runaway_line_dropped() {
        let mut buf = FrameBuffer::new(FramingMode::Raw);
        assert!(buf.push(&[b'A'; 300]).is_empty());
        assert!(buf.is_empty());
        assert_eq!(buf.push(format!("*{IDENT};\n").as_bytes()).len(), 1);
    }

    #[test]
    fn test_beast_unescapes_payload() {
        let mut payload = hex_decode(IDENT).unwrap();
        payload[5] = ESCAPE;
        let mut buf = FrameBuffer::new(FramingMode::Beast);
        let frames = buf.push(&beast(b'3', &payload, 255));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.as_ref(), payload.as_slice());
        assert_eq!(frames[0].signal_level, Some(0.0));
    }

    #[test]
    fn test_beast_skips_short_and_noise() {
        let mut stream = vec![0xFF, 0x00];
        stream.extend(beast(b'2', &[0x5D, 0xA9, 0xEE, 0x47, 0x00, 0x00, 0x00], 100));
        stream.extend(beast(b'1', &[0x12, 0x34], 100));
        stream.extend(beast(b'3', &hex_decode(IDENT).unwrap(), 100));
        let mut buf = FrameBuffer::new(FramingMode::Beast);
        let frames = buf.push(&stream);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].signal_level.unwrap() < 0.0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_beast_byte_at_a_time() {
        let stream = beast(b'3', &hex_decode(IDENT).unwrap(), 128);
        let mut buf = FrameBuffer::new(FramingMode::Beast);
        let mut frames = Vec::new();
        for b in &stream {
            frames.extend(buf.push(std::slice::from_ref(b)));
        }
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_beast_truncated_frame_resyncs() {
        let full = beast(b'3', &hex_decode(IDENT).unwrap(), 128);
        let mut stream = full[..12].to_vec();
        stream.extend(&full);
        let mut buf = FrameBuffer::new(FramingMode::Beast);
        assert_eq!(buf.push(&stream).len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut buf = FrameBuffer::new(FramingMode::Raw);
        buf.push(b"*8DA9");
        buf.reset();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(FramingMode::from_name("BEAST"), Some(FramingMode::Beast));
        assert_eq!(FramingMode::from_name("avr"), None);
        assert_eq!(FramingMode::Raw.default_port(), 30002);
        assert_eq!(FramingMode::Beast.default_port(), 30005);
    }
}
