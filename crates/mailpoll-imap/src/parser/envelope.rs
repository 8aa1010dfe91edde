//! `ENVELOPE` parsing.

use std::fmt;

use mailpoll_mime::encoded_word;

use super::tokenizer::{Token, Tokenizer};
use crate::{Error, Result};

/// One envelope address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name, RFC 2047 decoded.
    pub name: Option<String>,
    /// Source route (obsolete).
    pub adl: Option<String>,
    /// Mailbox name (local part).
    pub mailbox: Option<String>,
    /// Host name (domain part).
    pub host: Option<String>,
}

impl Address {
    /// Returns the full email address.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => Some(format!("{m}@{h}")),
            (Some(m), None) => Some(m.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let email = self.email().unwrap_or_default();
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => write!(f, "{name} <{email}>"),
            None => f.write_str(&email),
        }
    }
}

/// Parsed `ENVELOPE`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header.
    pub date: Option<String>,
    /// Subject, RFC 2047 decoded.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses.
    pub sender: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

impl Envelope {
    /// Parses the contents of an `ENVELOPE (...)` group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if a field is missing or an address list is
    /// malformed.
    pub fn parse(inner: &str) -> Result<Self> {
        let mut tok = Tokenizer::new(inner);
        let date = nstring(&tok.expect("envelope date")?);
        let subject = nstring(&tok.expect("envelope subject")?).map(|s| encoded_word::decode(&s));
        let from = address_list(&tok.expect("from")?)?;
        let sender = address_list(&tok.expect("sender")?)?;
        let reply_to = address_list(&tok.expect("reply-to")?)?;
        let to = address_list(&tok.expect("to")?)?;
        let cc = address_list(&tok.expect("cc")?)?;
        let bcc = address_list(&tok.expect("bcc")?)?;
        let in_reply_to = nstring(&tok.expect("in-reply-to")?);
        let message_id = nstring(&tok.expect("message-id")?);
        Ok(Self {
            date,
            subject,
            from,
            sender,
            reply_to,
            to,
            cc,
            bcc,
            in_reply_to,
            message_id,
        })
    }

    /// Header fields in RFC order; empty fields are left out.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let lists = [
            ("From", &self.from),
            ("Sender", &self.sender),
            ("Reply-To", &self.reply_to),
            ("To", &self.to),
            ("Cc", &self.cc),
            ("Bcc", &self.bcc),
        ];
        let mut out = Vec::with_capacity(10);
        push(&mut out, "Date", self.date.as_deref());
        push(&mut out, "Subject", self.subject.as_deref());
        for (name, list) in lists {
            if !list.is_empty() {
                out.push((name.to_string(), join(list)));
            }
        }
        push(&mut out, "In-Reply-To", self.in_reply_to.as_deref());
        push(&mut out, "Message-ID", self.message_id.as_deref());
        out
    }
}

fn push(out: &mut Vec<(String, String)>, name: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        out.push((name.to_string(), v.to_string()));
    }
}

fn join(list: &[Address]) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn nstring(token: &Token<'_>) -> Option<String> {
    token.as_str().map(str::to_string)
}

fn address_list(token: &Token<'_>) -> Result<Vec<Address>> {
    let list = match token {
        Token::Nil => return Ok(Vec::new()),
        Token::List(list) => *list,
        other => return Err(Error::parse(0, format!("expected address list, got {other:?}"))),
    };
    let mut addresses = Vec::new();
    for item in Tokenizer::new(list) {
        let Token::List(fields) = item? else {
            return Err(Error::parse(0, "expected address"));
        };
        let mut tok = Tokenizer::new(fields);
        let name = nstring(&tok.expect("address name")?).map(|n| encoded_word::decode(&n));
        let adl = nstring(&tok.expect("address adl")?);
        let mailbox = nstring(&tok.expect("address mailbox")?);
        let host = nstring(&tok.expect("address host")?);
        // group syntax markers carry no host
        if mailbox.is_none() && host.is_none() {
            continue;
        }
        addresses.push(Address {
            name,
            adl,
            mailbox,
            host,
        });
    }
    Ok(addresses)
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

    const SAMPLE: &str = concat!(
        r#""Mon, 7 Feb 1994 21:52:25 -0800" "=?UTF-8?Q?Caf=C3=A9_plans?=" "#,
        r#"(("Fred Foobar" NIL "foobar" "example.com")) "#,
        r#"(("Fred Foobar" NIL "foobar" "example.com")) "#,
        r#"NIL "#,
        r#"((NIL NIL "mooch" "owatagu.example.net")("Ann" NIL "ann" "example.org")) "#,
        r#"NIL NIL "<B27397-0100000@example.net>" "<msg1@example.com>""#
    );

    #[test]
    fn parses_fields() {
        let env = Envelope::parse(SAMPLE).unwrap();
        assert_eq!(env.subject.as_deref(), Some("Café plans"));
        assert_eq!(env.from[0].email().as_deref(), Some("foobar@example.com"));
        assert_eq!(env.to.len(), 2);
        assert!(env.reply_to.is_empty());
        assert_eq!(env.message_id.as_deref(), Some("<msg1@example.com>"));
    }

    #[test]
    fn headers_in_rfc_order() {
        let headers = Envelope::parse(SAMPLE).unwrap().headers();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["Date", "Subject", "From", "Sender", "To", "In-Reply-To", "Message-ID"]
        );
        assert_eq!(headers[2].1, "Fred Foobar <foobar@example.com>");
        assert_eq!(headers[4].1, "mooch@owatagu.example.net, Ann <ann@example.org>");
    }

    #[test]
    fn group_markers_are_skipped() {
        let env = Envelope::parse(concat!(
            r#"NIL NIL NIL NIL NIL "#,
            r#"((NIL NIL "undisclosed" NIL)(NIL NIL NIL NIL)) NIL NIL NIL NIL"#
        ))
        .unwrap();
        assert_eq!(env.to.len(), 1);
        assert_eq!(env.to[0].to_string(), "undisclosed");
    }

    #[test]
    fn missing_fields_fail() {
        assert!(Envelope::parse(r#""date" "subject""#).is_err());
        assert!(Envelope::parse(r#"NIL NIL "bad" NIL NIL NIL NIL NIL NIL NIL"#).is_err());
    }
}
