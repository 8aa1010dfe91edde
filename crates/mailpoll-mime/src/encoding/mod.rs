//! Content transfer encodings.
//!
//! Encoding is pull-based: a [`ChunkEncoder`] turns the next bounded slice of
//! a [`Cursor`] into output lines, so a sender can interleave one chunk per
//! poll with other work. Decoding is push-based: a [`Decoder`] accepts
//! arbitrarily split network data and never fails.

pub mod base64;
pub mod qp;
pub mod sanitize;

use std::fmt;
use std::str::FromStr;

use crate::cursor::Cursor;
use sanitize::{LineSanitizer, MAX_LINE_OCTETS};

/// Content-Transfer-Encoding values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64.
    Base64,
    /// Quoted-printable.
    QuotedPrintable,
    /// Unencoded binary.
    Binary,
}

impl TransferEncoding {
    /// Parses a header value. Unknown values are treated as 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Header value for this encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        }
    }

    /// Returns true when encoded output may carry bytes above 0x7F.
    #[must_use]
    pub const fn is_eight_bit(self) -> bool {
        matches!(self, Self::EightBit | Self::Binary)
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferEncoding {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Raw bytes copied per binary chunk.
const BINARY_CHUNK: usize = 512;

/// Bounded, resumable content encoder.
#[derive(Debug, Clone)]
pub enum ChunkEncoder {
    /// 57 input bytes per 76-character line.
    Base64,
    /// Quoted-printable, optionally flowed.
    QuotedPrintable(qp::Encoder),
    /// 7bit or 8bit text, one CRLF-normalized line per chunk.
    Text {
        /// Drop bytes above 0x7F.
        seven_bit: bool,
    },
    /// Bytes copied unchanged.
    Binary,
}

impl ChunkEncoder {
    /// Encoder for `encoding`; `flowed` only matters for quoted-printable.
    #[must_use]
    pub const fn new(encoding: TransferEncoding, flowed: bool) -> Self {
        match encoding {
            TransferEncoding::Base64 => Self::Base64,
            TransferEncoding::QuotedPrintable => Self::QuotedPrintable(qp::Encoder::new(flowed)),
            TransferEncoding::SevenBit => Self::Text { seven_bit: true },
            TransferEncoding::EightBit => Self::Text { seven_bit: false },
            TransferEncoding::Binary => Self::Binary,
        }
    }

    /// Encodes the next bounded chunk of `cursor` into `out`.
    ///
    /// Returns false when nothing was left to encode.
    pub fn next_chunk(&mut self, cursor: &mut Cursor, out: &mut Vec<u8>) -> bool {
        match self {
            Self::Base64 => base64::encode_line(cursor, out),
            Self::QuotedPrintable(encoder) => encoder.encode_line(cursor, out),
            Self::Text { seven_bit } => text_line(cursor, *seven_bit, out),
            Self::Binary => {
                let mut buf = [0u8; BINARY_CHUNK];
                let n = cursor.read_into(&mut buf);
                out.extend_from_slice(&buf[..n]);
                n > 0
            }
        }
    }

    /// Encodes everything left in `cursor`.
    pub fn encode_all(&mut self, cursor: &mut Cursor) -> Vec<u8> {
        let mut out = Vec::new();
        while self.next_chunk(cursor, &mut out) {}
        out
    }
}

fn text_line(cursor: &mut Cursor, seven_bit: bool, out: &mut Vec<u8>) -> bool {
    if !cursor.available() {
        return false;
    }
    let mut len = 0;
    while cursor.available() {
        match cursor.read() {
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                return true;
            }
            b'\r' if cursor.peek() == b'\n' => {}
            0 => {}
            b if seven_bit && b >= 0x80 => {}
            b => {
                out.push(b);
                len += 1;
                if len == MAX_LINE_OCTETS {
                    out.extend_from_slice(b"\r\n");
                    return true;
                }
            }
        }
    }
    true
}

/// Streaming decoder matching a transfer encoding.
#[derive(Debug, Clone)]
pub enum Decoder {
    /// Base64 input.
    Base64(base64::Decoder),
    /// Quoted-printable input.
    QuotedPrintable(qp::Decoder),
    /// 7bit or 8bit input.
    Text(LineSanitizer),
    /// Passed through unchanged.
    Binary,
}

impl Decoder {
    /// Decoder for `encoding`.
    #[must_use]
    pub const fn new(encoding: TransferEncoding) -> Self {
        match encoding {
            TransferEncoding::Base64 => Self::Base64(base64::Decoder::new()),
            TransferEncoding::QuotedPrintable => Self::QuotedPrintable(qp::Decoder::new()),
            TransferEncoding::SevenBit => Self::Text(LineSanitizer::seven_bit()),
            TransferEncoding::EightBit => Self::Text(LineSanitizer::eight_bit()),
            TransferEncoding::Binary => Self::Binary,
        }
    }

    /// Decodes the next slice of input.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        match self {
            Self::Base64(d) => d.feed(input),
            Self::QuotedPrintable(d) => d.feed(input),
            Self::Text(s) => s.feed(input),
            Self::Binary => input.to_vec(),
        }
    }

    /// Flushes anything held back.
    pub fn finish(&mut self) -> Vec<u8> {
        match self {
            Self::Base64(d) => d.finish(),
            Self::QuotedPrintable(d) => d.finish(),
            Self::Text(_) | Self::Binary => Vec::new(),
        }
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

    #[test]
    fn parse_and_display() {
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            "Quoted-Printable".parse::<TransferEncoding>().unwrap(),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::EightBit.to_string(), "8bit");
    }

    #[test]
    fn text_lines_are_crlf_normalized() {
        let mut cursor = Cursor::from_static(b"one\ntwo\r\nthree");
        let mut enc = ChunkEncoder::new(TransferEncoding::EightBit, false);
        let mut first = Vec::new();
        assert!(enc.next_chunk(&mut cursor, &mut first));
        assert_eq!(first, b"one\r\n");
        assert_eq!(enc.encode_all(&mut cursor), b"two\r\nthree");
    }

    #[test]
    fn seven_bit_text_drops_high_bytes() {
        let mut cursor = Cursor::from_bytes("na\u{ef}ve\n".as_bytes().to_vec());
        let out = ChunkEncoder::new(TransferEncoding::SevenBit, false).encode_all(&mut cursor);
        assert_eq!(out, b"nave\r\n");
    }

    #[test]
    fn over_long_text_line_is_split() {
        let mut cursor = Cursor::from_bytes(vec![b'z'; 1000]);
        let mut enc = ChunkEncoder::new(TransferEncoding::EightBit, false);
        let mut out = Vec::new();
        enc.next_chunk(&mut cursor, &mut out);
        assert_eq!(out.len(), MAX_LINE_OCTETS + 2);
    }

    #[test]
    fn decoder_dispatch() {
        let mut d = Decoder::new(TransferEncoding::Base64);
        let mut out = d.feed(b"SGVs");
        out.extend(d.feed(b"bG8="));
        out.extend(d.finish());
        assert_eq!(out, b"Hello");

        let mut d = Decoder::new(TransferEncoding::QuotedPrintable);
        assert_eq!(d.feed(b"a=3Db"), b"a=b");

        let mut d = Decoder::new(TransferEncoding::SevenBit);
        assert_eq!(d.feed(b"a\0\xffb"), b"ab");
    }
}
