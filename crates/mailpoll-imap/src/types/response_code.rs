//! Response codes.

use super::Flags;

/// Bracketed code at the start of a status response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: Human-readable message that MUST be shown to user.
    Alert,
    /// CAPABILITY: capability tokens.
    Capability(Vec<String>),
    /// PERMANENTFLAGS: Flags that can be changed permanently.
    PermanentFlags(Flags),
    /// READ-ONLY: Mailbox selected as read-only.
    ReadOnly,
    /// READ-WRITE: Mailbox selected as read-write.
    ReadWrite,
    /// TRYCREATE: Mailbox doesn't exist, but can be created.
    TryCreate,
    /// UIDNEXT: Next UID to be assigned.
    UidNext(u32),
    /// UIDVALIDITY: Unique identifier validity value.
    UidValidity(u32),
    /// UNSEEN: First unseen message sequence number.
    Unseen(u32),
    /// APPENDUID: validity and UID of an appended message.
    AppendUid {
        /// UIDVALIDITY of the mailbox.
        uidvalidity: u32,
        /// UID of the appended message.
        uid: u32,
    },
    /// HIGHESTMODSEQ: Highest mod-sequence value (CONDSTORE).
    HighestModSeq(u64),
    /// NOMODSEQ: Server doesn't support mod-sequences for this mailbox.
    NoModSeq,
    /// Unknown response code.
    Unknown(String),
}

impl ResponseCode {
    /// Splits a leading `[CODE ...]` off status text.
    ///
    /// Returns the code, if any, and the remaining human-readable text.
    #[must_use]
    pub fn split(text: &str) -> (Option<Self>, &str) {
        let Some(rest) = text.strip_prefix('[') else {
            return (None, text);
        };
        let Some(end) = rest.find(']') else {
            return (None, text);
        };
        (Some(Self::parse(&rest[..end])), rest[end + 1..].trim_start())
    }

    /// Parses the text between the brackets.
    #[must_use]
    pub fn parse(inner: &str) -> Self {
        let (atom, args) = inner.split_once(' ').unwrap_or((inner, ""));
        let args = args.trim();
        let number = || args.split(' ').next().and_then(|n| n.parse().ok());
        match atom.to_ascii_uppercase().as_str() {
            "ALERT" => Self::Alert,
            "READ-ONLY" => Self::ReadOnly,
            "READ-WRITE" => Self::ReadWrite,
            "TRYCREATE" => Self::TryCreate,
            "NOMODSEQ" => Self::NoModSeq,
            "CAPABILITY" => {
                Self::Capability(args.split_ascii_whitespace().map(str::to_string).collect())
            }
            "PERMANENTFLAGS" => {
                let list = args.trim_start_matches('(').trim_end_matches(')');
                Self::PermanentFlags(Flags::parse_list(list))
            }
            "UIDNEXT" => number().map_or_else(|| Self::Unknown(inner.to_string()), Self::UidNext),
            "UIDVALIDITY" => {
                number().map_or_else(|| Self::Unknown(inner.to_string()), Self::UidValidity)
            }
            "UNSEEN" => number().map_or_else(|| Self::Unknown(inner.to_string()), Self::Unseen),
            "HIGHESTMODSEQ" => args
                .parse()
                .map_or_else(|_| Self::Unknown(inner.to_string()), Self::HighestModSeq),
            "APPENDUID" => {
                let mut nums = args.split(' ').filter_map(|n| n.parse().ok());
                match (nums.next(), nums.next()) {
                    (Some(uidvalidity), Some(uid)) => Self::AppendUid { uidvalidity, uid },
                    _ => Self::Unknown(inner.to_string()),
                }
            }
            _ => Self::Unknown(inner.to_string()),
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

    #[test]
    fn numeric_codes() {
        assert_eq!(ResponseCode::parse("UIDVALIDITY 3857529045"), ResponseCode::UidValidity(3857529045));
        assert_eq!(ResponseCode::parse("UIDNEXT 4392"), ResponseCode::UidNext(4392));
        assert_eq!(ResponseCode::parse("unseen 12"), ResponseCode::Unseen(12));
        assert_eq!(
            ResponseCode::parse("HIGHESTMODSEQ 715194045007"),
            ResponseCode::HighestModSeq(715194045007)
        );
        assert_eq!(
            ResponseCode::parse("APPENDUID 38505 3955"),
            ResponseCode::AppendUid { uidvalidity: 38505, uid: 3955 }
        );
    }

    #[test]
    fn permanent_flags() {
        let ResponseCode::PermanentFlags(flags) =
            ResponseCode::parse("PERMANENTFLAGS (\\Deleted \\Seen \\*)")
        else {
            panic!("expected PERMANENTFLAGS");
        };
        assert!(flags.contains(&Flag::Deleted));
        assert!(flags.contains(&Flag::Wildcard));
    }

    #[test]
    fn capability_code() {
        assert_eq!(
            ResponseCode::parse("CAPABILITY IMAP4rev1 IDLE"),
            ResponseCode::Capability(vec!["IMAP4rev1".into(), "IDLE".into()])
        );
    }

    #[test]
    fn split_text() {
        let (code, text) = ResponseCode::split("[READ-WRITE] SELECT completed");
        assert_eq!(code, Some(ResponseCode::ReadWrite));
        assert_eq!(text, "SELECT completed");
        let (code, text) = ResponseCode::split("plain text");
        assert!(code.is_none());
        assert_eq!(text, "plain text");
    }

    #[test]
    fn malformed_numbers_are_unknown() {
        assert_eq!(ResponseCode::parse("UIDNEXT x"), ResponseCode::Unknown("UIDNEXT x".into()));
    }
}
