//! Single-byte charset to UTF-8 transcoding.
//!
//! Only the charsets embedded mail servers commonly hand out are mapped:
//! ISO-8859-1 and the Thai family (TIS-620, ISO-8859-11, windows-874).
//! Bytes a table does not cover are copied through unchanged.

use std::borrow::Cow;
use std::fmt;

/// Offset from a Thai single-byte code to its Unicode scalar.
const THAI_OFFSET: u32 = 0x0D60;

/// Charset named by a `charset=` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    /// UTF-8, passed through.
    #[default]
    Utf8,
    /// US-ASCII, passed through.
    UsAscii,
    /// ISO-8859-1 (Latin-1).
    Iso8859_1,
    /// ISO-8859-11.
    Iso8859_11,
    /// TIS-620.
    Tis620,
    /// windows-874.
    Windows874,
    /// Anything else, passed through.
    Other(String),
}

impl Charset {
    /// Parses a charset label, case-insensitively.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let label = label.trim().trim_matches('"');
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Self::Utf8,
            "us-ascii" | "ascii" => Self::UsAscii,
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Self::Iso8859_1,
            "iso-8859-11" | "iso8859-11" => Self::Iso8859_11,
            "tis-620" | "tis620" => Self::Tis620,
            "windows-874" | "cp874" => Self::Windows874,
            _ => Self::Other(label.to_string()),
        }
    }

    /// Canonical label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Utf8 => "utf-8",
            Self::UsAscii => "us-ascii",
            Self::Iso8859_1 => "iso-8859-1",
            Self::Iso8859_11 => "iso-8859-11",
            Self::Tis620 => "tis-620",
            Self::Windows874 => "windows-874",
            Self::Other(label) => label,
        }
    }

    /// Returns true when decoding needs a table lookup.
    #[must_use]
    pub const fn needs_transcoding(&self) -> bool {
        matches!(
            self,
            Self::Iso8859_1 | Self::Iso8859_11 | Self::Tis620 | Self::Windows874
        )
    }

    /// Transcodes `input` to UTF-8 bytes.
    ///
    /// Charsets without a table borrow the input unchanged.
    #[must_use]
    pub fn to_utf8<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.needs_transcoding() || input.is_ascii() {
            return Cow::Borrowed(input);
        }
        let mut out = Vec::with_capacity(input.len() * 2);
        let mut buf = [0u8; 4];
        for &b in input {
            match self.map(b) {
                Some(c) => out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
                None => out.push(b),
            }
        }
        Cow::Owned(out)
    }

    /// Transcodes `input` into a `String`, replacing what is still invalid.
    #[must_use]
    pub fn decode_lossy(&self, input: &[u8]) -> String {
        String::from_utf8_lossy(&self.to_utf8(input)).into_owned()
    }

    fn map(&self, b: u8) -> Option<char> {
        if b < 0x80 {
            return Some(char::from(b));
        }
        match self {
            Self::Iso8859_1 => Some(char::from(b)),
            Self::Tis620 => thai(b),
            Self::Iso8859_11 => {
                if b == 0xA0 {
                    Some('\u{00A0}')
                } else {
                    thai(b)
                }
            }
            Self::Windows874 => match b {
                0x80 => Some('\u{20AC}'),
                0x85 => Some('\u{2026}'),
                0x91 => Some('\u{2018}'),
                0x92 => Some('\u{2019}'),
                0x93 => Some('\u{201C}'),
                0x94 => Some('\u{201D}'),
                0x95 => Some('\u{2022}'),
                0x96 => Some('\u{2013}'),
                0x97 => Some('\u{2014}'),
                0xA0 => Some('\u{00A0}'),
                _ => thai(b),
            },
            _ => None,
        }
    }
}

fn thai(b: u8) -> Option<char> {
    match b {
        0xA1..=0xDA | 0xDF..=0xFB => char::from_u32(u32::from(b) + THAI_OFFSET),
        _ => None,
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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
    fn parses_labels() {
        assert_eq!(Charset::parse("UTF-8"), Charset::Utf8);
        assert_eq!(Charset::parse("\"ISO-8859-1\""), Charset::Iso8859_1);
        assert_eq!(Charset::parse("TIS-620"), Charset::Tis620);
        assert_eq!(Charset::parse("Windows-874"), Charset::Windows874);
        assert_eq!(Charset::parse("koi8-r"), Charset::Other("koi8-r".into()));
        assert_eq!(Charset::parse("koi8-r").to_string(), "koi8-r");
    }

    #[test]
    fn latin1_maps_high_bytes() {
        let out = Charset::Iso8859_1.to_utf8(b"caf\xe9 \xa3");
        assert_eq!(&*out, "café £".as_bytes());
    }

    #[test]
    fn ascii_is_borrowed() {
        assert!(matches!(Charset::Tis620.to_utf8(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn thai_code_points() {
        // ko kai, sara a, baht sign
        let out = Charset::Tis620.decode_lossy(b"\xa1\xd0\xdf");
        assert_eq!(out, "\u{0E01}\u{0E30}\u{0E3F}");
        // Thai digit nine is the last mapped code.
        assert_eq!(Charset::Iso8859_11.decode_lossy(b"\xf9"), "\u{0E59}");
        assert_eq!(Charset::Iso8859_11.decode_lossy(b"\xa0"), "\u{00A0}");
    }

    #[test]
    fn windows_874_extras() {
        let out = Charset::Windows874.decode_lossy(b"\x80\x93ok\x94\x85");
        assert_eq!(out, "€“ok”…");
    }

    #[test]
    fn unmapped_bytes_pass_through() {
        let out = Charset::Tis620.to_utf8(b"a\xdbb");
        assert_eq!(&*out, b"a\xdbb");
        assert_eq!(&*Charset::Utf8.to_utf8(b"\xff"), b"\xff");
    }
}
