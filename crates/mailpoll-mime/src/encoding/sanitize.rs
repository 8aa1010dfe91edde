//! 7bit / 8bit line sanitizing (RFC 2045 section 2.7 and 2.8).
//!
//! NUL bytes are dropped, as is anything past 998 octets on one line. The
//! 7bit variant also drops bytes with the high bit set.

/// Longest line RFC 2045 allows, CRLF excluded.
pub const MAX_LINE_OCTETS: usize = 998;

/// Streaming sanitizer; line length is tracked across calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineSanitizer {
    seven_bit: bool,
    column: usize,
}

impl LineSanitizer {
    /// Sanitizer for 7bit content.
    #[must_use]
    pub const fn seven_bit() -> Self {
        Self {
            seven_bit: true,
            column: 0,
        }
    }

    /// Sanitizer for 8bit content.
    #[must_use]
    pub const fn eight_bit() -> Self {
        Self {
            seven_bit: false,
            column: 0,
        }
    }

    /// Filters `input`.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        for &b in input {
            match b {
                b'\n' => {
                    self.column = 0;
                    out.push(b);
                }
                b'\r' => out.push(b),
                0 => {}
                _ if self.seven_bit && b >= 0x80 => {}
                _ if self.column >= MAX_LINE_OCTETS => {}
                _ => {
                    self.column += 1;
                    out.push(b);
                }
            }
        }
        out
    }
}

/// Sanitizes a complete 7bit buffer.
#[must_use]
pub fn sanitize_7bit(input: &[u8]) -> Vec<u8> {
    LineSanitizer::seven_bit().feed(input)
}

/// Sanitizes a complete 8bit buffer.
#[must_use]
pub fn sanitize_8bit(input: &[u8]) -> Vec<u8> {
    LineSanitizer::eight_bit().feed(input)
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
    fn drops_nul_everywhere() {
        assert_eq!(sanitize_8bit(b"a\0b\0"), b"ab");
        assert_eq!(sanitize_7bit(b"\0x"), b"x");
    }

    #[test]
    fn seven_bit_drops_high_bytes() {
        assert_eq!(sanitize_7bit("caf\u{e9}!".as_bytes()), b"caf!");
        assert_eq!(sanitize_8bit("caf\u{e9}!".as_bytes()), "caf\u{e9}!".as_bytes());
    }

    #[test]
    fn truncates_long_lines() {
        let mut input = vec![b'a'; 1200];
        input.extend_from_slice(b"\r\nshort");
        let out = sanitize_8bit(&input);
        let first = out.split(|&b| b == b'\n').next().unwrap();
        assert_eq!(first.len(), MAX_LINE_OCTETS + 1);
        assert!(out.ends_with(b"\r\nshort"));
    }

    #[test]
    fn column_survives_chunk_boundaries() {
        let mut s = LineSanitizer::eight_bit();
        let a = s.feed(&[b'x'; 990]);
        let b = s.feed(&[b'y'; 20]);
        assert_eq!(a.len() + b.len(), MAX_LINE_OCTETS);
        let c = s.feed(b"\nz");
        assert_eq!(c, b"\nz");
    }
}
