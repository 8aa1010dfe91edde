//! Server capabilities and response status.

use std::fmt;

use mailpoll_core::{Mechanism, MechanismSet};

/// Status word of a tagged or untagged status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Command succeeded.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed.
    Bad,
    /// Greeting for an already authenticated connection.
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

impl ResponseStatus {
    /// Parses a status word, case-insensitively.
    #[must_use]
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }

    /// Returns true if this is a success status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

/// One capability token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1`.
    Imap4Rev1,
    /// `IMAP4rev2`.
    Imap4Rev2,
    /// `IDLE` (RFC 2177).
    Idle,
    /// `LITERAL+` (RFC 7888).
    LiteralPlus,
    /// `LITERAL-` (RFC 7888).
    LiteralMinus,
    /// `MULTIAPPEND` (RFC 3502).
    MultiAppend,
    /// `UIDPLUS` (RFC 4315).
    UidPlus,
    /// `ACL` (RFC 4314).
    Acl,
    /// `BINARY` (RFC 3516).
    Binary,
    /// `MOVE` (RFC 6851).
    Move,
    /// `QUOTA` (RFC 9208).
    Quota,
    /// `NAMESPACE` (RFC 2342).
    Namespace,
    /// `ENABLE` (RFC 5161).
    Enable,
    /// `ID` (RFC 2971).
    Id,
    /// `UNSELECT` (RFC 3691).
    Unselect,
    /// `CHILDREN` (RFC 3348).
    Children,
    /// `CONDSTORE` (RFC 7162).
    CondStore,
    /// `STARTTLS`.
    StartTls,
    /// `LOGINDISABLED`: the `LOGIN` command is refused.
    LoginDisabled,
    /// `SASL-IR` (RFC 4959): initial response on the `AUTHENTICATE` line.
    SaslIr,
    /// `AUTH=<mechanism>`.
    Auth(String),
    /// Anything else.
    Unknown(String),
}

impl Capability {
    /// Parses a capability token, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IMAP4REV2" => Self::Imap4Rev2,
            "IDLE" => Self::Idle,
            "LITERAL+" => Self::LiteralPlus,
            "LITERAL-" => Self::LiteralMinus,
            "MULTIAPPEND" => Self::MultiAppend,
            "UIDPLUS" => Self::UidPlus,
            "ACL" => Self::Acl,
            "BINARY" => Self::Binary,
            "MOVE" => Self::Move,
            "QUOTA" => Self::Quota,
            "NAMESPACE" => Self::Namespace,
            "ENABLE" => Self::Enable,
            "ID" => Self::Id,
            "UNSELECT" => Self::Unselect,
            "CHILDREN" => Self::Children,
            "CONDSTORE" => Self::CondStore,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "SASL-IR" => Self::SaslIr,
            _ if upper.starts_with("AUTH=") => Self::Auth(upper[5..].to_string()),
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => write!(f, "IMAP4rev1"),
            Self::Imap4Rev2 => write!(f, "IMAP4rev2"),
            Self::Idle => write!(f, "IDLE"),
            Self::LiteralPlus => write!(f, "LITERAL+"),
            Self::LiteralMinus => write!(f, "LITERAL-"),
            Self::MultiAppend => write!(f, "MULTIAPPEND"),
            Self::UidPlus => write!(f, "UIDPLUS"),
            Self::Acl => write!(f, "ACL"),
            Self::Binary => write!(f, "BINARY"),
            Self::Move => write!(f, "MOVE"),
            Self::Quota => write!(f, "QUOTA"),
            Self::Namespace => write!(f, "NAMESPACE"),
            Self::Enable => write!(f, "ENABLE"),
            Self::Id => write!(f, "ID"),
            Self::Unselect => write!(f, "UNSELECT"),
            Self::Children => write!(f, "CHILDREN"),
            Self::CondStore => write!(f, "CONDSTORE"),
            Self::StartTls => write!(f, "STARTTLS"),
            Self::LoginDisabled => write!(f, "LOGINDISABLED"),
            Self::SaslIr => write!(f, "SASL-IR"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Capability set announced by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    items: Vec<Capability>,
}

impl Capabilities {
    /// Builds a set from capability tokens.
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut caps = Self::default();
        caps.extend(tokens);
        caps
    }

    /// Adds tokens to the set.
    pub fn extend<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for token in tokens {
            let cap = Capability::parse(token);
            if !self.items.contains(&cap) {
                self.items.push(cap);
            }
        }
    }

    /// Returns true if `cap` was announced.
    #[must_use]
    pub fn has(&self, cap: &Capability) -> bool {
        self.items.contains(cap)
    }

    /// Returns true if nothing was announced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Announced capabilities in wire order.
    #[must_use]
    pub fn items(&self) -> &[Capability] {
        &self.items
    }

    /// `IDLE` support.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.has(&Capability::Idle)
    }

    /// `CONDSTORE` support.
    #[must_use]
    pub fn condstore(&self) -> bool {
        self.has(&Capability::CondStore)
    }

    /// `STARTTLS` support.
    #[must_use]
    pub fn starttls(&self) -> bool {
        self.has(&Capability::StartTls)
    }

    /// `SASL-IR` support.
    #[must_use]
    pub fn sasl_ir(&self) -> bool {
        self.has(&Capability::SaslIr)
    }

    /// `ID` support.
    #[must_use]
    pub fn id(&self) -> bool {
        self.has(&Capability::Id)
    }

    /// Mechanisms usable for authentication.
    ///
    /// [`Mechanism::Login`] stands for the `LOGIN` command and is present
    /// unless the server announced `LOGINDISABLED`.
    #[must_use]
    pub fn auth_mechanisms(&self) -> MechanismSet {
        let mut set: MechanismSet = self
            .items
            .iter()
            .filter_map(|c| match c {
                Capability::Auth(name) => Mechanism::parse(name),
                _ => None,
            })
            .collect();
        if self.has(&Capability::LoginDisabled) {
            set.remove(Mechanism::Login);
        } else {
            set.insert(Mechanism::Login);
        }
        set
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cap) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{cap}")?;
        }
        Ok(())
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

    mod status_tests {
        use super::*;

        #[test]
        fn parse_words() {
            assert_eq!(ResponseStatus::parse("ok"), Some(ResponseStatus::Ok));
            assert_eq!(ResponseStatus::parse("PREAUTH"), Some(ResponseStatus::PreAuth));
            assert_eq!(ResponseStatus::parse("FETCH"), None);
        }

        #[test]
        fn is_ok() {
            assert!(ResponseStatus::Ok.is_ok());
            assert!(ResponseStatus::PreAuth.is_ok());
            assert!(!ResponseStatus::No.is_ok());
            assert!(!ResponseStatus::Bye.is_ok());
        }
    }

    mod capability_tests {
        use super::*;

        #[test]
        fn parse_known_tokens() {
            assert_eq!(Capability::parse("imap4rev1"), Capability::Imap4Rev1);
            assert_eq!(Capability::parse("SASL-IR"), Capability::SaslIr);
            assert_eq!(Capability::parse("auth=xoauth2"), Capability::Auth("XOAUTH2".into()));
            assert_eq!(Capability::parse("X-GM-EXT-1"), Capability::Unknown("X-GM-EXT-1".into()));
        }

        #[test]
        fn display_round_trips_case() {
            assert_eq!(Capability::Imap4Rev1.to_string(), "IMAP4rev1");
            assert_eq!(Capability::Auth("PLAIN".into()).to_string(), "AUTH=PLAIN");
        }
    }

    mod set_tests {
        use super::*;

        #[test]
        fn feature_flags() {
            let caps = Capabilities::from_tokens("IMAP4rev1 IDLE CONDSTORE SASL-IR ID".split(' '));
            assert!(caps.idle());
            assert!(caps.condstore());
            assert!(caps.sasl_ir());
            assert!(caps.id());
            assert!(!caps.starttls());
        }

        #[test]
        fn auth_mechanisms_include_login_fallback() {
            let caps = Capabilities::from_tokens(["AUTH=PLAIN", "AUTH=XOAUTH2"]);
            let set = caps.auth_mechanisms();
            assert!(set.contains(Mechanism::Plain));
            assert!(set.contains(Mechanism::XOAuth2));
            assert!(set.contains(Mechanism::Login));
        }

        #[test]
        fn login_disabled_removes_login() {
            let caps = Capabilities::from_tokens(["AUTH=PLAIN", "AUTH=LOGIN", "LOGINDISABLED"]);
            let set = caps.auth_mechanisms();
            assert!(set.contains(Mechanism::Plain));
            assert!(!set.contains(Mechanism::Login));
        }

        #[test]
        fn extend_skips_duplicates() {
            let mut caps = Capabilities::from_tokens(["IDLE"]);
            caps.extend(["idle", "MOVE"]);
            assert_eq!(caps.items().len(), 2);
            assert_eq!(caps.to_string(), "IDLE MOVE");
        }
    }
}
