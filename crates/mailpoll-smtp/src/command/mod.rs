//! SMTP command builder.

use mailpoll_core::Mechanism;
use zeroize::Zeroizing;

use crate::types::Address;

/// `BODY=` parameter on `MAIL FROM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    /// RFC 6152 `8BITMIME`.
    EightBitMime,
    /// RFC 3030 `BINARYMIME`.
    BinaryMime,
}

impl BodyType {
    /// Parameter value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EightBitMime => "8BITMIME",
            Self::BinaryMime => "BINARYMIME",
        }
    }
}

/// DSN notification conditions for `RCPT TO` (RFC 3461).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Notify {
    /// Report successful delivery.
    pub success: bool,
    /// Report failed delivery.
    pub failure: bool,
    /// Report delayed delivery.
    pub delay: bool,
}

impl Notify {
    /// No notifications requested.
    pub const NEVER: Self = Self {
        success: false,
        failure: false,
        delay: false,
    };

    /// Every notification requested.
    pub const ALL: Self = Self {
        success: true,
        failure: true,
        delay: true,
    };

    /// Returns true when no condition is set.
    #[must_use]
    pub const fn is_never(self) -> bool {
        !self.success && !self.failure && !self.delay
    }

    /// `SUCCESS,FAILURE,DELAY` subset, or `None` when nothing is set.
    #[must_use]
    pub fn parameter(self) -> Option<String> {
        let flags: Vec<&str> = [
            (self.success, "SUCCESS"),
            (self.failure, "FAILURE"),
            (self.delay, "DELAY"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        (!flags.is_empty()).then(|| flags.join(","))
    }
}

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: Mechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<Zeroizing<String>>,
    },
    /// Bare base64 line answering a `334` challenge.
    AuthResponse(Zeroizing<String>),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
        /// BODY parameter
        body: Option<BodyType>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
        /// DSN conditions
        notify: Notify,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes.
    ///
    /// AUTH lines carry credentials, so the buffer is sized up front and
    /// wiped when dropped.
    #[must_use]
    pub fn serialize(&self) -> Zeroizing<Vec<u8>> {
        let secret = match self {
            Self::Auth {
                initial_response: Some(resp),
                ..
            } => resp.len(),
            Self::AuthResponse(resp) => resp.len(),
            _ => 0,
        };
        let mut buf = Zeroizing::new(Vec::with_capacity(secret + 64));

        match self {
            Self::Helo { hostname } => {
                buf.extend_from_slice(b"HELO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::Ehlo { hostname } => {
                buf.extend_from_slice(b"EHLO ");
                buf.extend_from_slice(hostname.as_bytes());
            }
            Self::StartTls => {
                buf.extend_from_slice(b"STARTTLS");
            }
            Self::Auth {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTH ");
                buf.extend_from_slice(mechanism.as_str().as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    buf.extend_from_slice(resp.as_bytes());
                }
            }
            Self::AuthResponse(resp) => {
                buf.extend_from_slice(resp.as_bytes());
            }
            Self::MailFrom { from, body } => {
                buf.extend_from_slice(b"MAIL FROM:<");
                buf.extend_from_slice(from.as_str().as_bytes());
                buf.push(b'>');
                if let Some(body_type) = body {
                    buf.extend_from_slice(b" BODY=");
                    buf.extend_from_slice(body_type.as_str().as_bytes());
                }
            }
            Self::RcptTo { to, notify } => {
                buf.extend_from_slice(b"RCPT TO:<");
                buf.extend_from_slice(to.as_str().as_bytes());
                buf.push(b'>');
                if let Some(param) = notify.parameter() {
                    buf.extend_from_slice(b" NOTIFY=");
                    buf.extend_from_slice(param.as_bytes());
                }
            }
            Self::Data => {
                buf.extend_from_slice(b"DATA");
            }
            Self::Rset => {
                buf.extend_from_slice(b"RSET");
            }
            Self::Noop => {
                buf.extend_from_slice(b"NOOP");
            }
            Self::Quit => {
                buf.extend_from_slice(b"QUIT");
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Wire form for logs, with credentials masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => format!("AUTH {mechanism} <redacted>"),
            Self::AuthResponse(_) => "<redacted>".to_string(),
            _ => {
                let wire = self.serialize();
                String::from_utf8_lossy(&wire[..wire.len() - 2]).into_owned()
            }
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

    #[test]
    fn test_ehlo_helo_commands() {
        let cmd = Command::Ehlo {
            hostname: "127.0.0.1".to_string(),
        };
        assert_eq!(cmd.serialize().to_vec(), b"EHLO 127.0.0.1\r\n");
        let cmd = Command::Helo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize().to_vec(), b"HELO client.example.com\r\n");
    }

    #[test]
    fn test_starttls_command() {
        assert_eq!(Command::StartTls.serialize().to_vec(), b"STARTTLS\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::Auth {
            mechanism: Mechanism::Plain,
            initial_response: Some(Zeroizing::new("AHVzZXIAcGFzcw==".to_string())),
        };
        assert_eq!(cmd.serialize().to_vec(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.redacted(), "AUTH PLAIN <redacted>");
    }

    #[test]
    fn test_auth_login_steps() {
        let cmd = Command::Auth {
            mechanism: Mechanism::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize().to_vec(), b"AUTH LOGIN\r\n");
        assert_eq!(cmd.redacted(), "AUTH LOGIN");
        let step = Command::AuthResponse(Zeroizing::new("dXNlcg==".to_string()));
        assert_eq!(step.serialize().to_vec(), b"dXNlcg==\r\n");
        assert_eq!(step.redacted(), "<redacted>");
    }

    #[test]
    fn test_mail_from() {
        let from = Address::new("sender@example.com").unwrap();
        let cmd = Command::MailFrom {
            from: from.clone(),
            body: None,
        };
        assert_eq!(cmd.serialize().to_vec(), b"MAIL FROM:<sender@example.com>\r\n");
        let cmd = Command::MailFrom {
            from,
            body: Some(BodyType::EightBitMime),
        };
        assert_eq!(
            cmd.serialize().to_vec(),
            b"MAIL FROM:<sender@example.com> BODY=8BITMIME\r\n"
        );
    }

    #[test]
    fn test_rcpt_to() {
        let to = Address::new("recipient@example.com").unwrap();
        let cmd = Command::RcptTo {
            to: to.clone(),
            notify: Notify::NEVER,
        };
        assert_eq!(cmd.serialize().to_vec(), b"RCPT TO:<recipient@example.com>\r\n");
        let cmd = Command::RcptTo {
            to,
            notify: Notify {
                success: true,
                failure: true,
                delay: false,
            },
        };
        assert_eq!(
            cmd.serialize().to_vec(),
            b"RCPT TO:<recipient@example.com> NOTIFY=SUCCESS,FAILURE\r\n"
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Data.serialize().to_vec(), b"DATA\r\n");
        assert_eq!(Command::Rset.serialize().to_vec(), b"RSET\r\n");
        assert_eq!(Command::Noop.serialize().to_vec(), b"NOOP\r\n");
        assert_eq!(Command::Quit.serialize().to_vec(), b"QUIT\r\n");
        assert_eq!(Command::Quit.redacted(), "QUIT");
    }

    #[test]
    fn test_notify_parameter() {
        assert_eq!(Notify::NEVER.parameter(), None);
        assert!(Notify::NEVER.is_never());
        assert_eq!(Notify::ALL.parameter().as_deref(), Some("SUCCESS,FAILURE,DELAY"));
    }
}
