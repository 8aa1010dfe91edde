//! IMAP command builder.
//!
//! [`Command::serialize`] produces the exact wire line, CRLF included;
//! [`Command::redacted`] is the same line with secrets masked, for logs.

mod serialize;
mod tag_generator;

use mailpoll_core::Mechanism;
use zeroize::Zeroizing;

use crate::types::Flags;

pub use tag_generator::TagGenerator;

use serialize::{write_astring, write_quoted};

/// Data items requested by a FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItems {
    /// `FULL` macro: flags, internal date, size, envelope and body.
    Full,
    /// `BODYSTRUCTURE`.
    BodyStructure,
    /// `BODY[section]`, or `BODY.PEEK[section]` when `peek`.
    Section {
        /// Section address such as `1.2`.
        section: String,
        /// Leave `\Seen` untouched.
        peek: bool,
    },
}

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAPABILITY`.
    Capability,
    /// `STARTTLS`.
    StartTls,
    /// `LOGIN user password`.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: Zeroizing<String>,
    },
    /// `AUTHENTICATE mechanism [initial-response]`.
    Authenticate {
        /// SASL mechanism.
        mechanism: Mechanism,
        /// Base64 initial response when `SASL-IR` is offered.
        initial_response: Option<Zeroizing<String>>,
    },
    /// Untagged SASL continuation line.
    AuthResponse(Zeroizing<String>),
    /// `ID ("name" .. "version" ..)`.
    Id {
        /// Client name.
        name: String,
        /// Client version.
        version: String,
    },
    /// `LIST reference pattern`.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// `SELECT mailbox [(CONDSTORE)]`.
    Select {
        /// Mailbox name.
        mailbox: String,
        /// Enable CONDSTORE.
        condstore: bool,
    },
    /// `EXAMINE mailbox [(CONDSTORE)]`.
    Examine {
        /// Mailbox name.
        mailbox: String,
        /// Enable CONDSTORE.
        condstore: bool,
    },
    /// `CLOSE`.
    Close,
    /// `SEARCH ...` or `UID SEARCH ...`, already validated.
    Search {
        /// Full criteria starting with the verb.
        criteria: String,
    },
    /// `[UID] FETCH n items`.
    Fetch {
        /// Message number or UID.
        number: u32,
        /// Address by UID.
        uid: bool,
        /// Requested items.
        items: FetchItems,
    },
    /// `IDLE`.
    Idle,
    /// Untagged `DONE` ending an `IDLE`.
    Done,
    /// `APPEND mailbox [(flags)] ["date"] {size}`.
    Append {
        /// Target mailbox.
        mailbox: String,
        /// Flags to set.
        flags: Flags,
        /// Internal date.
        date: Option<String>,
        /// Literal size of the message.
        size: u64,
    },
    /// `LOGOUT`.
    Logout,
    /// Caller-supplied command text.
    Raw(String),
}

impl Command {
    /// Returns true if the command line starts with a tag.
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        !matches!(self, Self::AuthResponse(_) | Self::Done)
    }

    /// Verb used in logs and status text.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } | Self::AuthResponse(_) => "AUTHENTICATE",
            Self::Id { .. } => "ID",
            Self::List { .. } => "LIST",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::Close => "CLOSE",
            Self::Search { .. } => "SEARCH",
            Self::Fetch { .. } => "FETCH",
            Self::Idle => "IDLE",
            Self::Done => "DONE",
            Self::Append { .. } => "APPEND",
            Self::Logout => "LOGOUT",
            Self::Raw(_) => "COMMAND",
        }
    }

    /// Serializes the command with `tag`, CRLF included.
    ///
    /// The line may carry credentials and is wiped when dropped.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(self.wire_capacity(tag)));
        if self.is_tagged() {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }
        self.write_body(&mut buf, false);
        buf.extend_from_slice(b"\r\n");
        buf
    }

    // Secret-bearing lines are sized up front so the buffer never
    // reallocates and leaves an unwiped copy behind.
    fn wire_capacity(&self, tag: &str) -> usize {
        let secret = match self {
            Self::Login { username, password } => 2 * (username.len() + password.len()) + 16,
            Self::Authenticate {
                initial_response: Some(ir),
                ..
            } => ir.len() + 32,
            Self::AuthResponse(data) => data.len(),
            _ => 0,
        };
        tag.len() + secret + 64
    }

    /// Serialized line with credentials masked, without CRLF.
    #[must_use]
    pub fn redacted(&self, tag: &str) -> String {
        let mut buf = Vec::with_capacity(64);
        if self.is_tagged() {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }
        self.write_body(&mut buf, true);
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn write_body(&self, buf: &mut Vec<u8>, redact: bool) {
        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_quoted(buf, username);
                buf.push(b' ');
                if redact {
                    buf.extend_from_slice(b"<redacted>");
                } else {
                    write_quoted(buf, password);
                }
            }
            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTHENTICATE ");
                buf.extend_from_slice(mechanism.as_str().as_bytes());
                if let Some(ir) = initial_response {
                    buf.push(b' ');
                    if redact {
                        buf.extend_from_slice(b"<redacted>");
                    } else {
                        buf.extend_from_slice(ir.as_bytes());
                    }
                }
            }
            Self::AuthResponse(data) => {
                if redact && !data.is_empty() {
                    buf.extend_from_slice(b"<redacted>");
                } else {
                    buf.extend_from_slice(data.as_bytes());
                }
            }
            Self::Id { name, version } => {
                buf.extend_from_slice(b"ID (\"name\" ");
                write_quoted(buf, name);
                buf.extend_from_slice(b" \"version\" ");
                write_quoted(buf, version);
                buf.push(b')');
            }
            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_quoted(buf, reference);
                buf.push(b' ');
                if pattern == "*" || pattern == "%" {
                    buf.extend_from_slice(pattern.as_bytes());
                } else {
                    write_astring(buf, pattern);
                }
            }
            Self::Select { mailbox, condstore } | Self::Examine { mailbox, condstore } => {
                buf.extend_from_slice(self.name().as_bytes());
                buf.push(b' ');
                write_astring(buf, mailbox);
                if *condstore {
                    buf.extend_from_slice(b" (CONDSTORE)");
                }
            }
            Self::Close => buf.extend_from_slice(b"CLOSE"),
            Self::Search { criteria } => buf.extend_from_slice(criteria.as_bytes()),
            Self::Fetch { number, uid, items } => {
                if *uid {
                    buf.extend_from_slice(b"UID ");
                }
                buf.extend_from_slice(format!("FETCH {number} ").as_bytes());
                match items {
                    FetchItems::Full => buf.extend_from_slice(b"FULL"),
                    FetchItems::BodyStructure => buf.extend_from_slice(b"BODYSTRUCTURE"),
                    FetchItems::Section { section, peek } => {
                        buf.extend_from_slice(if *peek { b"BODY.PEEK[" } else { b"BODY[" });
                        buf.extend_from_slice(section.as_bytes());
                        buf.push(b']');
                    }
                }
            }
            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),
            Self::Append {
                mailbox,
                flags,
                date,
                size,
            } => {
                buf.extend_from_slice(b"APPEND ");
                write_astring(buf, mailbox);
                if !flags.is_empty() {
                    buf.push(b' ');
                    buf.extend_from_slice(flags.to_list().as_bytes());
                }
                if let Some(date) = date {
                    buf.push(b' ');
                    write_quoted(buf, date);
                }
                buf.extend_from_slice(format!(" {{{size}}}").as_bytes());
            }
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::Raw(text) => buf.extend_from_slice(text.as_bytes()),
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
    use crate::types::Flag;

    fn line(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("A0001").to_vec()).unwrap()
    }

    #[test]
    fn simple_commands() {
        assert_eq!(line(&Command::Capability), "A0001 CAPABILITY\r\n");
        assert_eq!(line(&Command::Done), "DONE\r\n");
        assert_eq!(
            line(&Command::List {
                reference: String::new(),
                pattern: "*".into()
            }),
            "A0001 LIST \"\" *\r\n"
        );
    }

    #[test]
    fn select_with_condstore() {
        let cmd = Command::Select {
            mailbox: "Sent Items".into(),
            condstore: true,
        };
        assert_eq!(line(&cmd), "A0001 SELECT \"Sent Items\" (CONDSTORE)\r\n");
        let cmd = Command::Examine {
            mailbox: "INBOX".into(),
            condstore: false,
        };
        assert_eq!(line(&cmd), "A0001 EXAMINE INBOX\r\n");
    }

    #[test]
    fn fetch_variants() {
        let cmd = Command::Fetch {
            number: 7,
            uid: true,
            items: FetchItems::Section {
                section: "1.2".into(),
                peek: true,
            },
        };
        assert_eq!(line(&cmd), "A0001 UID FETCH 7 BODY.PEEK[1.2]\r\n");
        let cmd = Command::Fetch {
            number: 3,
            uid: false,
            items: FetchItems::Full,
        };
        assert_eq!(line(&cmd), "A0001 FETCH 3 FULL\r\n");
    }

    #[test]
    fn append_line() {
        let cmd = Command::Append {
            mailbox: "Drafts".into(),
            flags: [Flag::Seen, Flag::Draft].into_iter().collect(),
            date: Some("01-Jan-2024 10:00:00 +0000".into()),
            size: 310,
        };
        assert_eq!(
            line(&cmd),
            "A0001 APPEND Drafts (\\Seen \\Draft) \"01-Jan-2024 10:00:00 +0000\" {310}\r\n"
        );
    }

    #[test]
    fn id_line() {
        let cmd = Command::Id {
            name: "mailpoll".into(),
            version: "0.1".into(),
        };
        assert_eq!(line(&cmd), "A0001 ID (\"name\" \"mailpoll\" \"version\" \"0.1\")\r\n");
    }

    #[test]
    fn secrets_are_redacted() {
        let login = Command::Login {
            username: "joe".into(),
            password: Zeroizing::new("hunter2".to_string()),
        };
        assert_eq!(line(&login), "A0001 LOGIN \"joe\" \"hunter2\"\r\n");
        assert_eq!(login.redacted("A0001"), "A0001 LOGIN \"joe\" <redacted>");

        let auth = Command::Authenticate {
            mechanism: Mechanism::Plain,
            initial_response: Some(Zeroizing::new("AGpvZQBwdw==".to_string())),
        };
        assert!(!auth.redacted("A2").contains("AGpvZQBwdw=="));
        assert_eq!(line(&auth), "A0001 AUTHENTICATE PLAIN AGpvZQBwdw==\r\n");
        let step = Command::AuthResponse(Zeroizing::new("c2VjcmV0".to_string()));
        assert!(!step.is_tagged());
        assert_eq!(step.redacted(""), "<redacted>");
        assert_eq!(line(&step), "c2VjcmV0\r\n");
    }
}
