//! SMTP reply parser and classifier.
//!
//! Replies arrive a line at a time from a non-blocking reader, so parsing
//! is split in two: [`ReplyAccumulator`] collects continuation lines until
//! the final one (`250 ` rather than `250-`), then [`parse_reply`] turns
//! them into a [`Reply`].

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// RFC 3463 enhanced status codes (`250 2.1.0 Ok`) are removed from the
/// text; the last one seen is kept on the reply.
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    if lines.is_empty() {
        return Err(Error::Protocol("Empty reply".into()));
    }

    let first = &lines[0];
    let code = reply_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    let mut enhanced = None;
    for line in lines {
        if reply_code(line)? != code {
            return Err(Error::Protocol(format!("Mixed reply codes: {line}")));
        }
        let text = match line.len() {
            3 => "",
            n if n > 3 && matches!(line.as_bytes()[3], b' ' | b'-') => &line[4..],
            _ => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        };
        let (status, text) = split_enhanced(text, code);
        if status.is_some() {
            enhanced = status;
        }
        message.push(text.to_string());
    }

    let reply = Reply::new(ReplyCode::new(code), message);
    Ok(match enhanced {
        Some(status) => reply.with_enhanced(status),
        None => reply,
    })
}

fn reply_code(line: &str) -> Result<u16> {
    let digits = line
        .get(0..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("Invalid reply code: {line}")))?;
    digits
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {digits}")))
}

/// Splits `x.y.z ` off the front when its class matches the reply class.
fn split_enhanced(text: &str, code: u16) -> (Option<String>, &str) {
    let (head, rest) = text.split_once(' ').unwrap_or((text, ""));
    let mut parts = head.split('.');
    let class = parts.next();
    let valid = class.is_some_and(|c| c == (code / 100).to_string())
        && parts.clone().count() == 2
        && parts.all(|p| !p.is_empty() && p.len() <= 3 && p.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        (Some(head.to_string()), rest)
    } else {
        (None, text)
    }
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last line.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
}

/// Collects reply lines until a complete reply is available.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    lines: Vec<String>,
}

impl ReplyAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Feeds one raw line, CRLF optional.
    ///
    /// Returns the reply once its final line arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the collected lines do not form a reply. The
    /// accumulator is reset either way.
    pub fn push(&mut self, raw: &[u8]) -> Result<Option<Reply>> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }
        if let Err(e) = reply_code(line) {
            self.lines.clear();
            return Err(e);
        }
        self.lines.push(line.to_string());
        if !is_last_reply_line(line) {
            return Ok(None);
        }
        let lines = std::mem::take(&mut self.lines);
        parse_reply(&lines).map(Some)
    }

    /// Returns true while a multi-line reply is half collected.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Drops collected lines.
    pub fn clear(&mut self) {
        self.lines.clear();
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

    mod parse_tests {
        use super::*;

        #[test]
        fn single_line_reply() {
            let lines = vec!["250 OK".to_string()];
            let reply = parse_reply(&lines).unwrap();
            assert_eq!(reply.code.as_u16(), 250);
            assert_eq!(reply.message, vec!["OK"]);
            assert!(reply.is_success());
        }

        #[test]
        fn multi_line_reply() {
            let lines = vec![
                "250-First line".to_string(),
                "250-Second line".to_string(),
                "250 Last line".to_string(),
            ];
            let reply = parse_reply(&lines).unwrap();
            assert_eq!(reply.code.as_u16(), 250);
            assert_eq!(reply.message, vec!["First line", "Second line", "Last line"]);
        }

        #[test]
        fn greeting() {
            let lines = vec!["220 smtp.example.com ESMTP ready".to_string()];
            let reply = parse_reply(&lines).unwrap();
            assert_eq!(reply.code, ReplyCode::SERVICE_READY);
            assert_eq!(reply.message, vec!["smtp.example.com ESMTP ready"]);
            assert!(reply.enhanced.is_none());
        }

        #[test]
        fn enhanced_code_stripped() {
            let lines = vec!["535 5.7.8 Username and Password not accepted".to_string()];
            let reply = parse_reply(&lines).unwrap();
            assert_eq!(reply.enhanced.as_deref(), Some("5.7.8"));
            assert_eq!(reply.last_text(), "Username and Password not accepted");
        }

        #[test]
        fn enhanced_code_class_must_match() {
            let lines = vec!["250 5.0.0 odd".to_string()];
            let reply = parse_reply(&lines).unwrap();
            assert!(reply.enhanced.is_none());
            assert_eq!(reply.last_text(), "5.0.0 odd");
        }

        #[test]
        fn bare_code() {
            let reply = parse_reply(&["354".to_string()]).unwrap();
            assert_eq!(reply.code, ReplyCode::START_DATA);
            assert_eq!(reply.message, vec![""]);
        }

        #[test]
        fn is_last_line() {
            assert!(is_last_reply_line("250 OK"));
            assert!(is_last_reply_line("250"));
            assert!(!is_last_reply_line("250-Continuing"));
            assert!(!is_last_reply_line("25"));
        }

        #[test]
        fn errors() {
            assert!(parse_reply(&[]).is_err());
            assert!(parse_reply(&["25".to_string()]).is_err());
            assert!(parse_reply(&["ABC OK".to_string()]).is_err());
            assert!(parse_reply(&["250-a".to_string(), "251 b".to_string()]).is_err());
        }
    }

    mod accumulator_tests {
        use super::*;

        #[test]
        fn collects_until_final_line() {
            let mut acc = ReplyAccumulator::new();
            assert!(acc.push(b"250-smtp.example.com\r\n").unwrap().is_none());
            assert!(acc.is_partial());
            assert!(acc.push(b"250-8BITMIME\r\n").unwrap().is_none());
            let reply = acc.push(b"250 STARTTLS\r\n").unwrap().unwrap();
            assert_eq!(reply.message.len(), 3);
            assert!(!acc.is_partial());
        }

        #[test]
        fn skips_blank_lines() {
            let mut acc = ReplyAccumulator::new();
            assert!(acc.push(b"\r\n").unwrap().is_none());
            assert!(!acc.is_partial());
        }

        #[test]
        fn malformed_resets() {
            let mut acc = ReplyAccumulator::new();
            assert!(acc.push(b"hello there\r\n").is_err());
            assert!(!acc.is_partial());
        }
    }
}
