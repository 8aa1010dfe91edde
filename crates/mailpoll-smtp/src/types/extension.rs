//! SMTP extension types.

use mailpoll_core::{Mechanism, MechanismSet};

/// SMTP extensions discovered from the EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<Mechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// CHUNKING - Chunked message transfer
    Chunking,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// DSN - Delivery status notifications
    Dsn,
    /// BINARYMIME - Binary MIME
    BinaryMime,
    /// Unknown extension
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from the EHLO response.
    ///
    /// The legacy `AUTH=PLAIN LOGIN` spelling is accepted too.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let normalized = line.replacen('=', " ", 1);
        let parts: Vec<&str> = normalized.split_whitespace().collect();
        if parts.is_empty() {
            return Self::Unknown(line.to_string());
        }

        let keyword = parts[0].to_uppercase();
        match keyword.as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => {
                let mechanisms = parts[1..]
                    .iter()
                    .filter_map(|m| Mechanism::parse(m))
                    .collect();
                Self::Auth(mechanisms)
            }
            "SIZE" => {
                let size = parts.get(1).and_then(|s| s.parse().ok());
                Self::Size(size)
            }
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "CHUNKING" => Self::Chunking,
            "SMTPUTF8" => Self::SmtpUtf8,
            "DSN" => Self::Dsn,
            "BINARYMIME" => Self::BinaryMime,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// Feature set advertised by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// SASL mechanisms offered via `AUTH`.
    pub auth: MechanismSet,
    /// `STARTTLS` offered.
    pub starttls: bool,
    /// `8BITMIME` offered.
    pub eight_bit_mime: bool,
    /// `BINARYMIME` offered.
    pub binary_mime: bool,
    /// `CHUNKING` offered.
    pub chunking: bool,
    /// `SMTPUTF8` offered.
    pub smtp_utf8: bool,
    /// `PIPELINING` offered.
    pub pipelining: bool,
    /// `DSN` offered.
    pub dsn: bool,
    /// Maximum message size from `SIZE`, if declared.
    pub max_size: Option<usize>,
    /// `true` once an EHLO response was scanned.
    pub esmtp: bool,
}

impl Capabilities {
    /// Records one extension.
    pub fn insert(&mut self, ext: &Extension) {
        match ext {
            Extension::StartTls => self.starttls = true,
            Extension::Auth(mechs) => {
                for m in mechs {
                    self.auth.insert(*m);
                }
            }
            Extension::Size(size) => self.max_size = *size,
            Extension::EightBitMime => self.eight_bit_mime = true,
            Extension::Pipelining => self.pipelining = true,
            Extension::Chunking => self.chunking = true,
            Extension::SmtpUtf8 => self.smtp_utf8 = true,
            Extension::Dsn => self.dsn = true,
            Extension::BinaryMime => self.binary_mime = true,
            Extension::Unknown(_) => {}
        }
    }

    /// Builds the set from EHLO reply text lines.
    ///
    /// The first line is the server greeting and is skipped.
    #[must_use]
    pub fn from_ehlo<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut caps = Self {
            esmtp: true,
            ..Self::default()
        };
        for line in lines.iter().skip(1) {
            caps.insert(&Extension::parse(line.as_ref()));
        }
        caps
    }

    /// Returns true if any AUTH mechanism was offered.
    #[must_use]
    pub const fn supports_auth(&self) -> bool {
        !self.auth.is_empty()
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

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn parse_starttls() {
            assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        }

        #[test]
        fn parse_auth_plain() {
            let ext = Extension::parse("AUTH PLAIN LOGIN");
            if let Extension::Auth(mechs) = ext {
                assert_eq!(mechs.len(), 2);
                assert!(mechs.contains(&Mechanism::Plain));
                assert!(mechs.contains(&Mechanism::Login));
            } else {
                panic!("Expected Auth variant");
            }
        }

        #[test]
        fn parse_auth_legacy_equals() {
            let ext = Extension::parse("AUTH=LOGIN PLAIN");
            assert_eq!(ext, Extension::Auth(vec![Mechanism::Login, Mechanism::Plain]));
        }

        #[test]
        fn parse_auth_skips_unknown_mechanisms() {
            let ext = Extension::parse("AUTH CRAM-MD5 XOAUTH2 OAUTHBEARER");
            assert_eq!(ext, Extension::Auth(vec![Mechanism::XOAuth2]));
        }

        #[test]
        fn parse_size() {
            assert_eq!(Extension::parse("SIZE 52428800"), Extension::Size(Some(52_428_800)));
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        }

        #[test]
        fn parse_flags() {
            assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
            assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
            assert_eq!(Extension::parse("CHUNKING"), Extension::Chunking);
            assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
            assert_eq!(Extension::parse("DSN"), Extension::Dsn);
            assert_eq!(Extension::parse("BINARYMIME"), Extension::BinaryMime);
        }

        #[test]
        fn parse_unknown() {
            assert_eq!(
                Extension::parse("SOMECUSTOMEXT"),
                Extension::Unknown("SOMECUSTOMEXT".into())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }

    mod capabilities_tests {
        use super::*;

        #[test]
        fn from_ehlo_lines() {
            let caps = Capabilities::from_ehlo(&[
                "smtp.example.com greets you",
                "SIZE 35882577",
                "8BITMIME",
                "AUTH LOGIN PLAIN XOAUTH2",
                "STARTTLS",
                "DSN",
            ]);
            assert!(caps.esmtp);
            assert!(caps.starttls);
            assert!(caps.eight_bit_mime);
            assert!(caps.dsn);
            assert!(!caps.binary_mime);
            assert_eq!(caps.max_size, Some(35_882_577));
            assert!(caps.auth.contains(Mechanism::XOAuth2));
            assert!(caps.auth.contains(Mechanism::Login));
            assert!(caps.supports_auth());
        }

        #[test]
        fn greeting_line_is_not_an_extension() {
            let caps = Capabilities::from_ehlo(&["STARTTLS"]);
            assert!(!caps.starttls);
        }
    }
}
