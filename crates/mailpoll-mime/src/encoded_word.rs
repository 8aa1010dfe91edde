//! RFC 2047 encoded words.

use crate::charset::Charset;
use crate::encoding::{base64, qp};

/// Raw bytes per encoded word, keeping each word under 75 characters.
const WORD_INPUT: usize = 45;

/// Decodes every `=?charset?B|Q?payload?=` word in `text`.
///
/// Whitespace between two adjacent encoded words is dropped. Words that
/// fail to parse are left as they are.
#[must_use]
pub fn decode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;
    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match parse_word(candidate) {
            Some((decoded, used)) => {
                if !(after_word && before.chars().all(char::is_whitespace)) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[used..];
                after_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parses one encoded word at the start of `s`, returning the decoded
/// text and the number of bytes consumed.
fn parse_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let (label, body) = body.split_once('?')?;
    let (scheme, body) = body.split_once('?')?;
    let end = body.find("?=")?;
    let payload = &body[..end];
    if label.is_empty() || payload.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 language suffix.
    let charset = label.split('*').next().unwrap_or(label);

    let raw = match scheme {
        "B" | "b" => base64::decode(payload.as_bytes()),
        "Q" | "q" => qp::decode(payload.replace('_', " ").as_bytes()),
        _ => return None,
    };
    let used = 2 + label.len() + 1 + scheme.len() + 1 + end + 2;
    Some((Charset::parse(charset).decode_lossy(&raw), used))
}

/// Encodes `text` as UTF-8 base64 words when it is not plain ASCII.
///
/// Long values are split into several words at character boundaries and
/// folded with CRLF plus a space.
#[must_use]
pub fn encode(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (i, c) in text.char_indices() {
        let next = i + c.len_utf8();
        if next - start > WORD_INPUT && end > start {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(&text[start..end]);
    }
    words
        .iter()
        .map(|w| format!("=?utf-8?B?{}?=", base64::encode(w.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
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

    mod decode_tests {
        use super::*;

        #[test]
        fn base64_word() {
            assert_eq!(decode("=?UTF-8?B?SGVsbG8gV29ybGQ=?="), "Hello World");
        }

        #[test]
        fn q_word_with_underscores() {
            assert_eq!(decode("=?utf-8?Q?caf=C3=A9_au_lait?="), "café au lait");
        }

        #[test]
        fn surrounding_text_kept() {
            assert_eq!(decode("Re: =?utf-8?q?caf=C3=A9?= menu"), "Re: café menu");
        }

        #[test]
        fn whitespace_between_words_dropped() {
            assert_eq!(decode("=?utf-8?q?a?= \r\n =?utf-8?q?b?="), "ab");
        }

        #[test]
        fn charset_transcoded() {
            assert_eq!(decode("=?iso-8859-1?q?caf=E9?="), "café");
            assert_eq!(decode("=?TIS-620?B?odA=?="), "\u{0E01}\u{0E30}");
        }

        #[test]
        fn malformed_left_alone() {
            assert_eq!(decode("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
            assert_eq!(decode("price =? 5"), "price =? 5");
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn ascii_unchanged() {
            assert_eq!(encode("Hello"), "Hello");
        }

        #[test]
        fn non_ascii_is_b_encoded() {
            assert_eq!(encode("café"), "=?utf-8?B?Y2Fmw6k=?=");
        }

        #[test]
        fn long_values_fold() {
            let text = "é".repeat(40);
            let encoded = encode(&text);
            let words: Vec<&str> = encoded.split("\r\n ").collect();
            assert!(words.len() > 1);
            for w in &words {
                assert!(w.len() <= 75);
            }
            assert_eq!(decode(&encoded), text);
        }
    }
}
