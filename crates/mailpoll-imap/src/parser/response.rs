//! Response assembly and classification.
//!
//! The [`ResponseAccumulator`] joins a response that spans several lines
//! (because of `{n}` literals) into one text with each literal folded into
//! a quoted string. [`Response::parse`] then classifies that text.

use super::body::BodyStructure;
use super::envelope::Envelope;
use super::tokenizer::{Token, Tokenizer, quote};
use crate::types::{Flags, ListEntry, MailboxAttribute, ResponseCode, ResponseStatus};
use crate::{Error, Result};

/// Completion of a tagged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Status word.
    pub status: ResponseStatus,
    /// Bracketed response code, if any.
    pub code: Option<ResponseCode>,
    /// Text after the status word, surfaced verbatim.
    pub text: String,
}

impl Completion {
    /// Returns true for `OK`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Converts a failed completion into an error.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.status {
            ResponseStatus::Bad => Error::Bad(self.text),
            ResponseStatus::Bye => Error::Bye(self.text),
            _ => Error::No(self.text),
        }
    }
}

/// Classifies `line` against `tag`.
///
/// Returns `None` when the line is not the tagged completion for `tag`.
///
/// ```
/// use mailpoll_imap::parser::classify_tagged;
///
/// let done = classify_tagged("A1 OK Success\r\n", "A1").unwrap();
/// assert!(done.is_ok());
/// assert_eq!(done.text, "Success");
/// ```
#[must_use]
pub fn classify_tagged(line: &str, tag: &str) -> Option<Completion> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = ResponseStatus::parse(word)?;
    let (code, _) = ResponseCode::split(text);
    Some(Completion {
        status,
        code,
        text: text.to_string(),
    })
}

/// Untagged response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// `* OK|NO|BAD|PREAUTH|BYE [code] text`.
    Status {
        /// Status word.
        status: ResponseStatus,
        /// Bracketed code.
        code: Option<ResponseCode>,
        /// Remaining text.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<String>),
    /// `* LIST (attrs) "delim" name`.
    List(ListEntry),
    /// `* FLAGS (...)`.
    Flags(Flags),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(u32),
    /// `* SEARCH n n n`.
    Search(Vec<u32>),
    /// `* n FETCH (...)`; the group contents.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Contents of the FETCH group.
        items: String,
    },
    /// Anything else.
    Other(String),
}

/// A complete server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `+ text`.
    Continuation(String),
    /// Tagged completion.
    Tagged {
        /// Command tag.
        tag: String,
        /// Outcome.
        completion: Completion,
    },
    /// Untagged data.
    Untagged(Untagged),
}

impl Response {
    /// Parses one assembled response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if a known response is malformed.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim_end_matches(['\r', '\n']);
        if let Some(rest) = text.strip_prefix('+') {
            return Ok(Self::Continuation(rest.trim_start().to_string()));
        }
        if let Some(rest) = text.strip_prefix("* ") {
            return parse_untagged(rest).map(Self::Untagged);
        }
        let (tag, _) = text
            .split_once(' ')
            .ok_or_else(|| Error::parse(0, format!("unexpected response: {text}")))?;
        let completion = classify_tagged(text, tag)
            .ok_or_else(|| Error::parse(tag.len(), format!("unexpected response: {text}")))?;
        Ok(Self::Tagged {
            tag: tag.to_string(),
            completion,
        })
    }
}

fn parse_untagged(rest: &str) -> Result<Untagged> {
    let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));

    if let Some(status) = ResponseStatus::parse(word) {
        let (code, text) = ResponseCode::split(tail);
        return Ok(Untagged::Status {
            status,
            code,
            text: text.to_string(),
        });
    }

    if let Ok(n) = word.parse::<u32>() {
        let (kind, data) = tail.split_once(' ').unwrap_or((tail, ""));
        return Ok(match kind.to_ascii_uppercase().as_str() {
            "EXISTS" => Untagged::Exists(n),
            "RECENT" => Untagged::Recent(n),
            "EXPUNGE" => Untagged::Expunge(n),
            "FETCH" => {
                let mut tok = Tokenizer::new(data);
                let Some(Token::List(items)) = tok.next_token()? else {
                    return Err(Error::parse(0, "FETCH without item list"));
                };
                Untagged::Fetch {
                    seq: n,
                    items: items.to_string(),
                }
            }
            _ => Untagged::Other(rest.to_string()),
        });
    }

    Ok(match word.to_ascii_uppercase().as_str() {
        "CAPABILITY" => Untagged::Capability(tail.split_ascii_whitespace().map(str::to_string).collect()),
        "FLAGS" => {
            let list = tail.trim().trim_start_matches('(').trim_end_matches(')');
            Untagged::Flags(Flags::parse_list(list))
        }
        "SEARCH" => Untagged::Search(
            tail.split_ascii_whitespace()
                .map_while(|n| n.parse().ok())
                .collect(),
        ),
        "LIST" | "LSUB" => Untagged::List(parse_list_entry(tail)?),
        _ => Untagged::Other(rest.to_string()),
    })
}

fn parse_list_entry(tail: &str) -> Result<ListEntry> {
    let mut tok = Tokenizer::new(tail);
    let attributes = match tok.expect("list attributes")? {
        Token::List(attrs) => attrs.split_ascii_whitespace().map(MailboxAttribute::parse).collect(),
        _ => Vec::new(),
    };
    let delimiter = tok
        .expect("hierarchy delimiter")?
        .as_str()
        .and_then(|d| d.chars().next());
    let name = tok.expect("mailbox name")?.to_text();
    Ok(ListEntry {
        attributes,
        delimiter,
        name,
    })
}

/// Data items of one FETCH response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    /// `UID`.
    pub uid: Option<u32>,
    /// `FLAGS`.
    pub flags: Option<Flags>,
    /// `INTERNALDATE`.
    pub internal_date: Option<String>,
    /// `RFC822.SIZE`.
    pub size: Option<u64>,
    /// `MODSEQ`.
    pub modseq: Option<u64>,
    /// `ENVELOPE`.
    pub envelope: Option<Envelope>,
    /// `BODYSTRUCTURE` or `BODY`.
    pub body_structure: Option<BodyStructure>,
    /// `BODY[section]` contents carried inline.
    pub sections: Vec<(String, Option<String>)>,
}

impl FetchData {
    /// Parses the contents of a FETCH group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if an item is malformed.
    pub fn parse(items: &str) -> Result<Self> {
        let mut data = Self::default();
        let mut tok = Tokenizer::new(items);
        while let Some(name) = tok.next_token()? {
            let name = name.to_text();
            let upper = name.to_ascii_uppercase();
            let value = tok.expect("fetch item value")?;
            match upper.as_str() {
                "UID" => data.uid = value.number(),
                "FLAGS" => data.flags = value.list().map(Flags::parse_list),
                "INTERNALDATE" => data.internal_date = value.as_str().map(str::to_string),
                "RFC822.SIZE" => data.size = value.number(),
                "MODSEQ" => {
                    data.modseq = value
                        .list()
                        .and_then(|m| m.trim().parse().ok());
                }
                "ENVELOPE" => {
                    let inner = value.list().ok_or_else(|| Error::parse(0, "ENVELOPE is not a list"))?;
                    data.envelope = Some(Envelope::parse(inner)?);
                }
                "BODYSTRUCTURE" | "BODY" => {
                    let inner = value.list().ok_or_else(|| Error::parse(0, "BODY is not a list"))?;
                    data.body_structure = Some(BodyStructure::parse(inner)?);
                }
                _ if upper.starts_with("BODY[") || upper.starts_with("BINARY[") => {
                    let section = section_of(&name).to_string();
                    data.sections.push((section, value.as_str().map(str::to_string)));
                }
                _ => {}
            }
        }
        Ok(data)
    }

    /// Envelope headers followed by flags, date, size and attachments.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = self.envelope.as_ref().map(Envelope::headers).unwrap_or_default();
        if let Some(flags) = &self.flags {
            headers.push(("Flags".to_string(), flags.to_string()));
        }
        if let Some(date) = &self.internal_date {
            headers.push(("Internal-Date".to_string(), date.clone()));
        }
        if let Some(size) = self.size {
            headers.push(("Size".to_string(), size.to_string()));
        }
        if let Some(body) = &self.body_structure {
            headers.push(("Attachments".to_string(), body.attachment_count().to_string()));
        }
        headers
    }
}

/// Section text between the brackets of `BODY[...]`.
#[must_use]
pub fn section_of(item: &str) -> &str {
    item.split_once('[')
        .and_then(|(_, rest)| rest.split_once(']'))
        .map_or("", |(section, _)| section)
}

/// Returns the size of a `{n}` or `{n+}` literal that ends `line`.
#[must_use]
pub fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n"))?;
    let line = line.strip_suffix(b"}")?;
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Joins response lines and literals into one text.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    literal: Vec<u8>,
    pending: usize,
    max: usize,
}

impl ResponseAccumulator {
    /// Default cap on an assembled response.
    pub const DEFAULT_MAX: usize = 1024 * 1024;

    /// Creates an accumulator with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max(Self::DEFAULT_MAX)
    }

    /// Creates an accumulator refusing responses over `max` bytes.
    #[must_use]
    pub fn with_max(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    /// Literal bytes still expected before the next line.
    #[must_use]
    pub const fn pending_literal(&self) -> usize {
        self.pending
    }

    /// Returns true while a response is partly assembled.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.text.is_empty() || self.pending > 0
    }

    /// Feeds one line (CRLF included). Returns the response once complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the response grows past the cap.
    pub fn push_line(&mut self, line: &[u8]) -> Result<Option<String>> {
        if let Some(n) = literal_length(line) {
            let open = line.iter().rposition(|&b| b == b'{').unwrap_or(line.len());
            self.append(&line[..open])?;
            self.pending = n;
            self.literal.clear();
            if n == 0 {
                self.fold_literal()?;
            }
            return Ok(None);
        }
        let body = line
            .strip_suffix(b"\r\n")
            .or_else(|| line.strip_suffix(b"\n"))
            .unwrap_or(line);
        self.append(body)?;
        Ok(Some(std::mem::take(&mut self.text)))
    }

    /// Feeds raw literal bytes; returns how many were consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the response grows past the cap.
    pub fn push_literal(&mut self, data: &[u8]) -> Result<usize> {
        let used = data.len().min(self.pending);
        self.literal.extend_from_slice(&data[..used]);
        self.pending -= used;
        if self.pending == 0 {
            self.fold_literal()?;
        }
        Ok(used)
    }

    fn fold_literal(&mut self) -> Result<()> {
        let raw = std::mem::take(&mut self.literal);
        let quoted = quote(&String::from_utf8_lossy(&raw));
        self.append(quoted.as_bytes())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.text.len() + bytes.len() > self.max {
            self.clear();
            return Err(Error::Protocol(format!("response exceeds {} bytes", self.max)));
        }
        self.text.push_str(&String::from_utf8_lossy(bytes));
        Ok(())
    }

    /// Drops any partial response.
    pub fn clear(&mut self) {
        self.text.clear();
        self.literal.clear();
        self.pending = 0;
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

    mod classify_tests {
        use super::*;

        #[test]
        fn ok_success() {
            let done = classify_tagged("A1 OK Success\r\n", "A1").unwrap();
            assert_eq!(done.status, ResponseStatus::Ok);
            assert!(done.is_ok());
            assert_eq!(done.text, "Success");
        }

        #[test]
        fn bad_surfaces_text() {
            let done = classify_tagged("A1 BAD bad args\r\n", "A1").unwrap();
            assert_eq!(done.status, ResponseStatus::Bad);
            assert!(!done.is_ok());
            assert_eq!(done.text, "bad args");
            assert!(matches!(done.into_error(), Error::Bad(t) if t == "bad args"));
        }

        #[test]
        fn code_is_parsed_but_text_kept() {
            let done = classify_tagged("A0003 OK [READ-ONLY] EXAMINE completed", "A0003").unwrap();
            assert_eq!(done.code, Some(ResponseCode::ReadOnly));
            assert_eq!(done.text, "[READ-ONLY] EXAMINE completed");
        }

        #[test]
        fn other_tags_and_untagged_do_not_match() {
            assert!(classify_tagged("A10 OK done", "A1").is_none());
            assert!(classify_tagged("* OK done", "A1").is_none());
            assert!(classify_tagged("A1 FETCH", "A1").is_none());
        }
    }

    mod untagged_tests {
        use super::*;

        fn untagged(text: &str) -> Untagged {
            match Response::parse(text).unwrap() {
                Response::Untagged(u) => u,
                other => panic!("expected untagged, got {other:?}"),
            }
        }

        #[test]
        fn counts() {
            assert_eq!(untagged("* 172 EXISTS\r\n"), Untagged::Exists(172));
            assert_eq!(untagged("* 1 RECENT"), Untagged::Recent(1));
            assert_eq!(untagged("* 44 EXPUNGE"), Untagged::Expunge(44));
        }

        #[test]
        fn status_with_code() {
            let Untagged::Status { status, code, text } =
                untagged("* OK [UIDVALIDITY 3857529045] UIDs valid")
            else {
                panic!("expected status");
            };
            assert_eq!(status, ResponseStatus::Ok);
            assert_eq!(code, Some(ResponseCode::UidValidity(3857529045)));
            assert_eq!(text, "UIDs valid");
        }

        #[test]
        fn search_results() {
            assert_eq!(untagged("* SEARCH 2 84 882"), Untagged::Search(vec![2, 84, 882]));
            assert_eq!(untagged("* SEARCH"), Untagged::Search(vec![]));
        }

        #[test]
        fn list_entry() {
            let Untagged::List(entry) = untagged(r#"* LIST (\HasNoChildren \Sent) "/" "Sent Items""#)
            else {
                panic!("expected list");
            };
            assert_eq!(entry.name, "Sent Items");
            assert_eq!(entry.delimiter, Some('/'));
            assert_eq!(entry.attributes.len(), 2);
        }

        #[test]
        fn flags_and_capability() {
            let Untagged::Flags(flags) = untagged(r"* FLAGS (\Answered \Seen)") else {
                panic!("expected flags");
            };
            assert_eq!(flags.len(), 2);
            assert_eq!(
                untagged("* CAPABILITY IMAP4rev1 IDLE"),
                Untagged::Capability(vec!["IMAP4rev1".into(), "IDLE".into()])
            );
        }

        #[test]
        fn continuation_and_tagged() {
            assert_eq!(
                Response::parse("+ idling\r\n").unwrap(),
                Response::Continuation("idling".into())
            );
            let Response::Tagged { tag, completion } = Response::parse("A0002 NO [TRYCREATE] nope").unwrap()
            else {
                panic!("expected tagged");
            };
            assert_eq!(tag, "A0002");
            assert_eq!(completion.code, Some(ResponseCode::TryCreate));
        }
    }

    mod fetch_tests {
        use super::*;

        #[test]
        fn fetch_items() {
            let data = FetchData::parse(concat!(
                r"UID 4827 FLAGS (\Seen) INTERNALDATE ",
                r#""17-Jul-1996 02:44:25 -0700" RFC822.SIZE 4286 MODSEQ (12121231000)"#
            ))
            .unwrap();
            assert_eq!(data.uid, Some(4827));
            assert!(data.flags.unwrap().is_seen());
            assert_eq!(data.size, Some(4286));
            assert_eq!(data.modseq, Some(12121231000));
            assert_eq!(data.internal_date.as_deref(), Some("17-Jul-1996 02:44:25 -0700"));
        }

        #[test]
        fn full_fetch_headers() {
            let data = FetchData::parse(concat!(
                r#"FLAGS () INTERNALDATE "01-Jan-2024 10:00:00 +0000" RFC822.SIZE 900 "#,
                r#"ENVELOPE ("Mon, 1 Jan 2024 10:00:00 +0000" "Hello" (("Ann" NIL "ann" "example.org")) "#,
                r#"NIL NIL NIL NIL NIL NIL "<id@x>") "#,
                r#"BODY (("TEXT" "PLAIN" NIL NIL NIL "7BIT" 10 1)("APPLICATION" "PDF" NIL NIL NIL "BASE64" 400) "MIXED")"#
            ))
            .unwrap();
            let headers = data.headers();
            let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(
                names,
                vec!["Date", "Subject", "From", "Message-ID", "Flags", "Internal-Date", "Size", "Attachments"]
            );
            assert_eq!(headers.last().unwrap().1, "1");
        }

        #[test]
        fn inline_section() {
            let data = FetchData::parse(r#"BODY[1] "hello" UID 3"#).unwrap();
            assert_eq!(data.sections, vec![("1".to_string(), Some("hello".to_string()))]);
            assert_eq!(section_of("BODY[1.2]<0>"), "1.2");
        }
    }

    mod accumulator_tests {
        use super::*;

        #[test]
        fn literal_lengths() {
            assert_eq!(literal_length(b"* 1 FETCH (BODY[1] {42}\r\n"), Some(42));
            assert_eq!(literal_length(b"A1 APPEND box {10+}\r\n"), Some(10));
            assert_eq!(literal_length(b"* OK {x}\r\n"), None);
            assert_eq!(literal_length(b"* OK done\r\n"), None);
        }

        #[test]
        fn single_line() {
            let mut acc = ResponseAccumulator::new();
            assert_eq!(acc.push_line(b"* 3 EXISTS\r\n").unwrap().as_deref(), Some("* 3 EXISTS"));
            assert!(!acc.in_progress());
        }

        #[test]
        fn literal_is_folded_into_quoted_string() {
            let mut acc = ResponseAccumulator::new();
            assert!(acc.push_line(b"* 1 FETCH (ENVELOPE (NIL {9}\r\n").unwrap().is_none());
            assert_eq!(acc.pending_literal(), 9);
            assert_eq!(acc.push_literal(b"say \"hi\"").unwrap(), 8);
            assert_eq!(acc.push_literal(b"!tail").unwrap(), 1);
            let text = acc
                .push_line(b" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n")
                .unwrap()
                .unwrap();
            assert_eq!(
                text,
                r#"* 1 FETCH (ENVELOPE (NIL "say \"hi\"!" NIL NIL NIL NIL NIL NIL NIL NIL))"#
            );
            let Response::Untagged(Untagged::Fetch { items, .. }) = Response::parse(&text).unwrap() else {
                panic!("expected fetch");
            };
            let data = FetchData::parse(&items).unwrap();
            assert_eq!(data.envelope.unwrap().subject.as_deref(), Some("say \"hi\"!"));
        }

        #[test]
        fn cap_is_enforced() {
            let mut acc = ResponseAccumulator::with_max(8);
            assert!(acc.push_line(b"* 1 FETCH (a very long line)\r\n").is_err());
            assert!(!acc.in_progress());
        }
    }
}
