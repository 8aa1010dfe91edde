//! Quoted-printable (RFC 2045 section 6.7).
//!
//! The encoder works one output line at a time over a [`Cursor`], so any
//! single call writes at most 76 characters plus CRLF. In flowed mode
//! (RFC 3676) long lines are broken after the last space that fits, leaving
//! the space in place as the flowed soft-break marker.

use std::collections::VecDeque;

use crate::cursor::Cursor;

/// Maximum encoded line length, soft-break `=` included.
pub const MAX_LINE: usize = 76;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

const fn needs_escape(b: u8) -> bool {
    b < 0x20 || b == b'=' || b > 0x7E
}

fn is_break_at(cursor: &mut Cursor, offset: u64) -> bool {
    match cursor.peek_n(offset) {
        b'\n' => true,
        b'\r' => cursor.peek_n(offset + 1) == b'\n',
        _ => false,
    }
}

fn at_end(cursor: &Cursor, offset: u64) -> bool {
    cursor.position() + offset >= cursor.size()
}

/// Width of the byte at `offset` once encoded.
fn encoded_width(cursor: &mut Cursor, offset: u64) -> usize {
    let b = cursor.peek_n(offset);
    if b == b' ' || b == b'\t' {
        if at_end(cursor, offset + 1) || is_break_at(cursor, offset + 1) {
            3
        } else {
            1
        }
    } else if needs_escape(b) {
        3
    } else {
        1
    }
}

/// Resumable line-at-a-time encoder.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    flowed: bool,
    breaks: VecDeque<u64>,
    scanned_to: Option<u64>,
}

impl Encoder {
    /// Creates an encoder; `flowed` enables RFC 3676 soft breaks.
    #[must_use]
    pub const fn new(flowed: bool) -> Self {
        Self {
            flowed,
            breaks: VecDeque::new(),
            scanned_to: None,
        }
    }

    /// Encodes the next output line from `cursor` into `out`.
    ///
    /// The line ends in CRLF unless the input ran out first. Returns false
    /// when the cursor was already exhausted.
    pub fn encode_line(&mut self, cursor: &mut Cursor, out: &mut Vec<u8>) -> bool {
        if !cursor.available() {
            return false;
        }
        if self.flowed && self.scanned_to.is_none_or(|end| cursor.position() > end) {
            self.scan_breaks(cursor);
        }

        let mut column = 0;
        while cursor.available() {
            if is_break_at(cursor, 0) {
                if cursor.read() == b'\r' {
                    cursor.read();
                }
                out.extend_from_slice(b"\r\n");
                return true;
            }
            if self.breaks.front() == Some(&cursor.position()) {
                self.breaks.pop_front();
                out.push(cursor.read());
                out.extend_from_slice(b"\r\n");
                return true;
            }
            let width = encoded_width(cursor, 0);
            if column + width > MAX_LINE - 1 {
                out.extend_from_slice(b"=\r\n");
                return true;
            }
            let b = cursor.read();
            if width == 3 {
                out.extend_from_slice(&[b'=', HEX[usize::from(b >> 4)], HEX[usize::from(b & 0x0F)]]);
            } else {
                out.push(b);
            }
            column += width;
        }
        true
    }

    /// Records the flowed break positions of the input line at the cursor.
    fn scan_breaks(&mut self, cursor: &mut Cursor) {
        let start = cursor.position();
        let mut width = 0;
        let mut since_space = 0;
        let mut last_space: Option<u64> = None;
        let mut offset = 0;
        while !at_end(cursor, offset) && !is_break_at(cursor, offset) {
            let w = encoded_width(cursor, offset);
            if width + w > MAX_LINE - 1 {
                if let Some(space) = last_space.take() {
                    self.breaks.push_back(start + space);
                    width = since_space;
                } else {
                    width = 0;
                    since_space = 0;
                }
            }
            width += w;
            if cursor.peek_n(offset) == b' ' {
                last_space = Some(offset);
                since_space = 0;
            } else {
                since_space += w;
            }
            offset += 1;
        }
        self.scanned_to = Some(start + offset);
    }
}

/// Encodes a whole buffer (non-flowed).
#[must_use]
pub fn encode(data: &[u8]) -> String {
    let mut cursor = Cursor::from_bytes(data.to_vec());
    let mut encoder = Encoder::new(false);
    let mut out = Vec::with_capacity(data.len() + data.len() / 4);
    while encoder.encode_line(&mut cursor, &mut out) {}
    // Output is pure ASCII.
    String::from_utf8_lossy(&out).into_owned()
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Decodes quoted-printable bytes. Malformed escapes are kept literally.
#[must_use]
pub fn decode(data: &[u8]) -> Vec<u8> {
    let mut decoder = Decoder::new();
    let mut out = decoder.feed(data);
    out.extend(decoder.finish());
    out
}

/// Streaming decoder that carries a split `=XX` escape across calls.
#[derive(Debug, Default, Clone)]
pub struct Decoder {
    carry: Vec<u8>,
}

impl Decoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { carry: Vec::new() }
    }

    /// Decodes `input`, holding back an incomplete trailing escape.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(input);

        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            if b != b'=' {
                out.push(b);
                i += 1;
                continue;
            }
            let rest = &data[i + 1..];
            match rest {
                [] | [b'\r'] => {
                    self.carry.extend_from_slice(&data[i..]);
                    break;
                }
                [b'\r', b'\n', ..] => i += 3,
                [b'\n', ..] => i += 2,
                [h] if hex_value(*h).is_some() => {
                    self.carry.extend_from_slice(&data[i..]);
                    break;
                }
                [h, l, ..] => match (hex_value(*h), hex_value(*l)) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                },
                [_] => {
                    out.push(b'=');
                    i += 1;
                }
            }
        }
        out
    }

    /// Emits any held-back bytes literally.
    pub fn finish(&mut self) -> Vec<u8> {
        let rest = std::mem::take(&mut self.carry);
        if rest == b"=" || rest == b"=\r" {
            return Vec::new();
        }
        rest
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lines_of(encoded: &str) -> Vec<&str> {
        encoded.split("\r\n").collect()
    }

    fn encode_flowed(text: &str) -> String {
        let mut cursor = Cursor::from_bytes(text.as_bytes().to_vec());
        let mut encoder = Encoder::new(true);
        let mut out = Vec::new();
        while encoder.encode_line(&mut cursor, &mut out) {}
        String::from_utf8(out).unwrap()
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn plain_ascii_untouched() {
            assert_eq!(encode(b"Hello, World!"), "Hello, World!");
        }

        #[test]
        fn escapes_equals_and_high_bytes() {
            assert_eq!(encode("a=b é".as_bytes()), "a=3Db =C3=A9");
        }

        #[test]
        fn trailing_space_before_break_escaped() {
            assert_eq!(encode(b"end \r\nnext\t"), "end=20\r\nnext=09");
        }

        #[test]
        fn bare_lf_becomes_crlf() {
            assert_eq!(encode(b"a\nb"), "a\r\nb");
        }

        #[test]
        fn long_line_soft_breaks() {
            let text = "x".repeat(200);
            let encoded = encode(text.as_bytes());
            let lines = lines_of(&encoded);
            assert_eq!(lines.len(), 3);
            assert_eq!(lines[0].len(), 76);
            assert!(lines[0].ends_with('='));
            assert!(lines.iter().all(|l| l.len() <= MAX_LINE));
        }

        #[test]
        fn escape_never_split_by_soft_break() {
            let text = "é".repeat(60);
            let encoded = encode(text.as_bytes());
            for line in lines_of(&encoded) {
                assert!(line.len() <= MAX_LINE);
                let body = line.strip_suffix('=').unwrap_or(line);
                assert_eq!(body.len() % 3, 0);
            }
        }
    }

    mod flowed_tests {
        use super::*;

        #[test]
        fn breaks_after_last_fitting_space() {
            let text = "word ".repeat(30);
            let encoded = encode_flowed(text.trim_end());
            let lines = lines_of(&encoded);
            assert!(lines.len() > 1);
            for line in &lines[..lines.len() - 1] {
                assert!(line.ends_with(' '), "flowed line should end with space: {line:?}");
                assert!(line.len() <= MAX_LINE);
            }
            let rejoined: String = lines.concat();
            assert_eq!(rejoined, text.trim_end());
        }

        #[test]
        fn short_lines_unchanged() {
            assert_eq!(encode_flowed("hi there\r\nbye"), "hi there\r\nbye");
        }

        #[test]
        fn unbreakable_run_falls_back_to_soft_break() {
            let encoded = encode_flowed(&"y".repeat(100));
            assert!(lines_of(&encoded)[0].ends_with('='));
        }
    }

    mod decode_tests {
        use super::*;

        #[test]
        fn decodes_escapes() {
            assert_eq!(decode(b"H=C3=A9llo"), "Héllo".as_bytes());
        }

        #[test]
        fn soft_breaks_removed() {
            assert_eq!(decode(b"Hello=\r\nWorld"), b"HelloWorld");
            assert_eq!(decode(b"Hello=\nWorld"), b"HelloWorld");
        }

        #[test]
        fn malformed_escape_kept() {
            assert_eq!(decode(b"50=ZZ off"), b"50=ZZ off");
            assert_eq!(decode(b"a=\r"), b"a");
        }

        #[test]
        fn lowercase_hex_accepted() {
            assert_eq!(decode(b"=c3=a9"), "é".as_bytes());
        }

        #[test]
        fn streaming_carries_split_escape() {
            let mut d = Decoder::new();
            let mut out = d.feed(b"caf=C");
            out.extend(d.feed(b"3=A9 ok="));
            out.extend(d.feed(b"\r\nnext"));
            out.extend(d.finish());
            assert_eq!(out, "café oknext".as_bytes());
        }
    }

    proptest! {
        #[test]
        fn round_trip(text in "[ -~]{0,200}(\r\n[ -~]{0,200}){0,4}") {
            // Trailing spaces before a break are escaped, so they survive too.
            let encoded = encode(text.as_bytes());
            prop_assert_eq!(decode(encoded.as_bytes()), text.as_bytes());
        }

        #[test]
        fn lines_never_exceed_limit(data in proptest::collection::vec(any::<u8>(), 0..400)) {
            let encoded = encode(&data);
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= MAX_LINE);
            }
        }
    }
}
