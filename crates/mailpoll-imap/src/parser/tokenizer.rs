//! Quote- and parenthesis-aware tokenizer over assembled response text.
//!
//! Literals have already been folded into quoted strings by the
//! [`ResponseAccumulator`](super::ResponseAccumulator), so only atoms,
//! quoted strings, `NIL` and balanced `(...)` groups remain.

use std::borrow::Cow;
use std::str::FromStr;

use crate::{Error, Result};

/// One token of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Bare atom or number. Bracketed sections such as `BODY[1.2]` or
    /// `[UIDNEXT 5]` stay inside one atom.
    Atom(&'a str),
    /// Quoted string with escapes removed.
    Quoted(Cow<'a, str>),
    /// Contents of a balanced `(...)` group, without the outer parentheses.
    List(&'a str),
    /// The `NIL` atom.
    Nil,
}

impl<'a> Token<'a> {
    /// Text of an atom or quoted string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Atom(s) => Some(s),
            Self::Quoted(s) => Some(s),
            Self::List(_) | Self::Nil => None,
        }
    }

    /// Text of an atom or quoted string; empty for `NIL` and lists.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.as_str().map(str::to_string).unwrap_or_default()
    }

    /// Group contents if this is a list.
    #[must_use]
    pub const fn list(&self) -> Option<&'a str> {
        match self {
            Self::List(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `NIL`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Parses an atom or quoted string as a number.
    #[must_use]
    pub fn number<N: FromStr>(&self) -> Option<N> {
        self.as_str().and_then(|s| s.parse().ok())
    }
}

/// Walks tokens of `text[begin..end]`.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    text: &'a str,
    pos: usize,
    end: usize,
}

impl<'a> Tokenizer<'a> {
    /// Tokenizes all of `text`, ignoring a trailing CRLF.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let trimmed = text.trim_end_matches(['\r', '\n']);
        Self {
            text,
            pos: 0,
            end: trimmed.len(),
        }
    }

    /// Tokenizes the window `[begin, end)` of `text`.
    #[must_use]
    pub fn window(text: &'a str, begin: usize, end: usize) -> Self {
        let end = end.min(text.len());
        Self {
            text,
            pos: begin.min(end),
            end,
        }
    }

    /// Byte offset of the next unread character.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Unread text, leading spaces skipped.
    #[must_use]
    pub fn remainder(&mut self) -> &'a str {
        self.skip_spaces();
        &self.text[self.pos..self.end]
    }

    /// Returns true once only spaces remain.
    pub fn is_empty(&mut self) -> bool {
        self.skip_spaces();
        self.pos >= self.end
    }

    fn skip_spaces(&mut self) {
        let bytes = self.text.as_bytes();
        while self.pos < self.end && bytes[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    /// Returns the next token, or `None` at the end of the window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on an unterminated quote or group, or a
    /// stray `)`.
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>> {
        self.skip_spaces();
        if self.pos >= self.end {
            return Ok(None);
        }
        let bytes = &self.text.as_bytes()[..self.end];
        let start = self.pos;
        match bytes[start] {
            b'(' => {
                let after = skip_list(bytes, start)?;
                self.pos = after;
                Ok(Some(Token::List(&self.text[start + 1..after - 1])))
            }
            b'"' => {
                let after = skip_quoted(bytes, start)?;
                self.pos = after;
                Ok(Some(Token::Quoted(unescape(&self.text[start + 1..after - 1]))))
            }
            b')' => Err(Error::parse(start, "unbalanced ')'")),
            _ => {
                let after = skip_atom(bytes, start)?;
                self.pos = after;
                let atom = &self.text[start..after];
                if atom.eq_ignore_ascii_case("NIL") {
                    Ok(Some(Token::Nil))
                } else {
                    Ok(Some(Token::Atom(atom)))
                }
            }
        }
    }

    /// Returns the next token, failing at the end of the window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] naming `what` when nothing is left.
    pub fn expect(&mut self, what: &str) -> Result<Token<'a>> {
        let pos = self.pos;
        self.next_token()?
            .ok_or_else(|| Error::parse(pos, format!("expected {what}")))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

/// Consumes the balanced group opening at `start`; returns the offset just
/// past its closing `)`.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the group never closes.
pub fn skip_list(bytes: &[u8], start: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = skip_quoted(bytes, i)?;
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::parse(start, "unterminated list"))
}

fn skip_quoted(bytes: &[u8], start: usize) -> Result<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(Error::parse(start, "unterminated quoted string"))
}

fn skip_atom(bytes: &[u8], start: usize) -> Result<usize> {
    let mut i = start;
    let mut brackets = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => brackets += 1,
            b']' => brackets = brackets.saturating_sub(1),
            b'"' if brackets > 0 => {
                i = skip_quoted(bytes, i)?;
                continue;
            }
            b' ' | b'(' | b')' if brackets == 0 => break,
            _ => {}
        }
        i += 1;
    }
    if brackets > 0 {
        return Err(Error::parse(start, "unterminated '['"));
    }
    Ok(i)
}

fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\\') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Quotes `value` as an IMAP quoted string.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
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

    fn tokens(text: &str) -> Vec<Token<'_>> {
        Tokenizer::new(text).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn atoms_and_numbers() {
        let toks = tokens("* 23 EXISTS\r\n");
        assert_eq!(toks, vec![Token::Atom("*"), Token::Atom("23"), Token::Atom("EXISTS")]);
        assert_eq!(toks[1].number::<u32>(), Some(23));
    }

    #[test]
    fn quoted_with_escapes() {
        let toks = tokens(r#""plain" "say \"hi\"" "back\\slash""#);
        assert_eq!(toks[0].as_str(), Some("plain"));
        assert_eq!(toks[1].as_str(), Some("say \"hi\""));
        assert_eq!(toks[2].as_str(), Some("back\\slash"));
    }

    #[test]
    fn balanced_group_is_one_token() {
        let toks = tokens(r#"(FLAGS (\Seen) ENVELOPE ("a)b" NIL)) tail"#);
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].list(), Some(r#"FLAGS (\Seen) ENVELOPE ("a)b" NIL)"#));
        assert_eq!(toks[1], Token::Atom("tail"));
    }

    #[test]
    fn brackets_keep_spaces() {
        let toks = tokens("BODY[HEADER.FIELDS (FROM TO)] [UIDNEXT 5] x");
        assert_eq!(toks[0], Token::Atom("BODY[HEADER.FIELDS (FROM TO)]"));
        assert_eq!(toks[1], Token::Atom("[UIDNEXT 5]"));
        assert_eq!(toks[2], Token::Atom("x"));
    }

    #[test]
    fn nil_is_recognized() {
        let toks = tokens("NIL nil \"NIL\"");
        assert!(toks[0].is_nil());
        assert!(toks[1].is_nil());
        assert_eq!(toks[2].as_str(), Some("NIL"));
        assert_eq!(Token::Nil.to_text(), "");
    }

    #[test]
    fn window_limits_range() {
        let text = "skip (a b) stop here";
        let mut t = Tokenizer::window(text, 5, 10);
        assert_eq!(t.next_token().unwrap(), Some(Token::List("a b")));
        assert!(t.next_token().unwrap().is_none());
    }

    #[test]
    fn unterminated_input_fails() {
        assert!(Tokenizer::new("(a (b)").next_token().is_err());
        assert!(Tokenizer::new("\"open").next_token().is_err());
        assert!(Tokenizer::new(") x").next_token().is_err());
    }

    #[test]
    fn skip_list_counts_depth() {
        let bytes = b"((a) (b (c))) rest";
        assert_eq!(skip_list(bytes, 0).unwrap(), 13);
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("a\"b\\c"), r#""a\"b\\c""#);
    }
}
