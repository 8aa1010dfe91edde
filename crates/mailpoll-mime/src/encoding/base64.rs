//! Base64 (RFC 2045 section 6.8).
//!
//! Encoding emits 57 input bytes per 76-character line. Decoding is
//! lenient: bytes outside the alphabet are skipped, `=` ends a group, and a
//! dangling single symbol is dropped.

use ::base64::Engine;
use ::base64::alphabet;
use ::base64::engine::general_purpose::STANDARD;
use ::base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::cursor::Cursor;

/// Raw bytes per encoded line.
pub const CHUNK_INPUT: usize = 57;

/// Encoded characters per full line.
pub const LINE_LENGTH: usize = 76;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// Encodes `data` as one unbroken base64 string.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Length of the unbroken encoding of `n` bytes.
#[must_use]
pub const fn encoded_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

/// Length of the line-broken encoding of `n` bytes, CRLFs included.
#[must_use]
pub const fn chunked_len(n: usize) -> usize {
    encoded_len(n) + 2 * n.div_ceil(CHUNK_INPUT)
}

/// Encodes the next line of at most 57 bytes from `cursor` into `out`,
/// followed by CRLF.
///
/// Returns false when the cursor was already exhausted.
pub fn encode_line(cursor: &mut Cursor, out: &mut Vec<u8>) -> bool {
    let mut raw = [0u8; CHUNK_INPUT];
    let n = cursor.read_into(&mut raw);
    if n == 0 {
        return false;
    }
    let start = out.len();
    out.resize(start + encoded_len(n), 0);
    // The buffer is sized exactly, so this cannot fail.
    let written = STANDARD
        .encode_slice(&raw[..n], &mut out[start..])
        .unwrap_or(0);
    out.truncate(start + written);
    out.extend_from_slice(b"\r\n");
    true
}

/// Decodes base64 text, skipping anything outside the alphabet.
#[must_use]
pub fn decode(text: &[u8]) -> Vec<u8> {
    let mut decoder = Decoder::new();
    let mut out = decoder.feed(text);
    out.extend(decoder.finish());
    out
}

const fn is_symbol(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

fn decode_symbols(symbols: &[u8], out: &mut Vec<u8>) {
    let usable = if symbols.len() % 4 == 1 {
        symbols.len() - 1
    } else {
        symbols.len()
    };
    if usable == 0 {
        return;
    }
    if let Err(e) = LENIENT.decode_vec(&symbols[..usable], out) {
        tracing::warn!(error = %e, "dropping undecodable base64 segment");
    }
}

/// Streaming decoder that accepts input split at arbitrary points.
#[derive(Debug, Default, Clone)]
pub struct Decoder {
    pending: Vec<u8>,
}

impl Decoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Decodes every complete 4-symbol group seen so far.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() / 4 * 3 + 3);
        for &b in input {
            if is_symbol(b) {
                self.pending.push(b);
            } else if b == b'=' && !self.pending.is_empty() {
                // Padding closes the current group.
                decode_symbols(&self.pending, &mut out);
                self.pending.clear();
            }
        }
        let whole = self.pending.len() / 4 * 4;
        if whole > 0 {
            decode_symbols(&self.pending[..whole], &mut out);
            self.pending.drain(..whole);
        }
        out
    }

    /// Flushes a trailing partial group.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        decode_symbols(&self.pending, &mut out);
        self.pending.clear();
        out
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

    #[test]
    fn encodes_known_value() {
        assert_eq!(encode(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn decodes_with_and_without_padding() {
        assert_eq!(decode(b"SGVsbG8sIFdvcmxkIQ=="), b"Hello, World!");
        assert_eq!(decode(b"SGVsbG8sIFdvcmxkIQ"), b"Hello, World!");
        assert_eq!(decode(b"SGk="), b"Hi");
    }

    #[test]
    fn skips_line_breaks_and_junk() {
        assert_eq!(decode(b"SGVs\r\nbG8s\r\n IFdv*cmxk\tIQ=="), b"Hello, World!");
    }

    #[test]
    fn drops_dangling_symbol() {
        assert_eq!(decode(b"SGk=Q"), b"Hi");
    }

    #[test]
    fn streaming_split_anywhere() {
        let encoded = encode(b"The quick brown fox jumps over the lazy dog");
        for split in 0..encoded.len() {
            let mut d = Decoder::new();
            let mut out = d.feed(&encoded.as_bytes()[..split]);
            out.extend(d.feed(&encoded.as_bytes()[split..]));
            out.extend(d.finish());
            assert_eq!(out, b"The quick brown fox jumps over the lazy dog");
        }
    }

    #[test]
    fn chunked_lines() {
        let data = vec![0xA5u8; 100];
        let mut cursor = Cursor::from_bytes(data.clone());
        let mut lines = Vec::new();
        loop {
            let mut line = Vec::new();
            if !encode_line(&mut cursor, &mut line) {
                break;
            }
            lines.push(line);
        }
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76 + 2);
        assert_eq!(lines[1].len(), 60 + 2);
        assert_eq!(lines.iter().map(Vec::len).sum::<usize>(), chunked_len(100));

        let joined: Vec<u8> = lines.concat();
        assert_eq!(decode(&joined), data);
    }

    proptest! {
        #[test]
        fn round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(decode(encode(&data).as_bytes()), data);
        }

        #[test]
        fn chunked_output_shape(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let mut cursor = Cursor::from_bytes(data.clone());
            let mut out = Vec::new();
            while encode_line(&mut cursor, &mut out) {}
            prop_assert_eq!(out.len(), chunked_len(data.len()));
            for line in out.split(|&b| b == b'\n') {
                prop_assert!(line.len() <= LINE_LENGTH + 1);
            }
            prop_assert_eq!(decode(&out), data);
        }
    }
}
