//! Mailbox types.

use super::Flags;

/// State of the selected mailbox.
///
/// Replaced wholesale on every `SELECT`/`EXAMINE`; `IDLE` notifications
/// update the counts afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Mailbox name as selected.
    pub name: String,
    /// Number of messages (`EXISTS`).
    pub exists: u32,
    /// Number of recent messages (`RECENT`).
    pub recent: u32,
    /// `UIDVALIDITY`.
    pub uid_validity: u32,
    /// `UIDNEXT`, 0 when unknown.
    pub uid_next: u32,
    /// First unseen message (`UNSEEN`).
    pub unseen: Option<u32>,
    /// `HIGHESTMODSEQ` when CONDSTORE is in use.
    pub highest_modseq: Option<u64>,
    /// The server answered `NOMODSEQ`.
    pub no_modseq: bool,
    /// Flags defined in the mailbox.
    pub flags: Flags,
    /// Flags that can be changed permanently.
    pub permanent_flags: Flags,
    /// Selected read-only.
    pub read_only: bool,
}

/// One `LIST` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Name attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Mailbox name.
    pub name: String,
}

impl ListEntry {
    /// Returns true unless the mailbox is `\Noselect`.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }
}

/// Mailbox name attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// `\Noselect`.
    NoSelect,
    /// `\NonExistent`.
    NonExistent,
    /// `\Noinferiors`.
    NoInferiors,
    /// `\HasNoChildren`.
    HasNoChildren,
    /// `\HasChildren`.
    HasChildren,
    /// `\Marked`.
    Marked,
    /// `\Unmarked`.
    Unmarked,
    /// `\All` (RFC 6154).
    All,
    /// `\Archive`.
    Archive,
    /// `\Drafts`.
    Drafts,
    /// `\Flagged`.
    Flagged,
    /// `\Junk`.
    Junk,
    /// `\Sent`.
    Sent,
    /// `\Trash`.
    Trash,
    /// Anything else.
    Unknown(String),
}

impl MailboxAttribute {
    /// Parses an attribute, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NONEXISTENT" => Self::NonExistent,
            "\\NOINFERIORS" => Self::NoInferiors,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\MARKED" => Self::Marked,
            "\\UNMARKED" => Self::Unmarked,
            "\\ALL" => Self::All,
            "\\ARCHIVE" => Self::Archive,
            "\\DRAFTS" => Self::Drafts,
            "\\FLAGGED" => Self::Flagged,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\SENT" => Self::Sent,
            "\\TRASH" => Self::Trash,
            _ => Self::Unknown(s.to_string()),
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
    fn attribute_parse() {
        assert_eq!(MailboxAttribute::parse("\\noselect"), MailboxAttribute::NoSelect);
        assert_eq!(MailboxAttribute::parse("\\Spam"), MailboxAttribute::Junk);
        assert_eq!(
            MailboxAttribute::parse("\\Custom"),
            MailboxAttribute::Unknown("\\Custom".into())
        );
    }

    #[test]
    fn selectable() {
        let entry = ListEntry {
            attributes: vec![MailboxAttribute::HasChildren],
            delimiter: Some('/'),
            name: "Archive".into(),
        };
        assert!(entry.is_selectable());
        let entry = ListEntry {
            attributes: vec![MailboxAttribute::NoSelect],
            ..entry
        };
        assert!(!entry.is_selectable());
    }

    #[test]
    fn default_info_is_empty() {
        let info = MailboxInfo::default();
        assert_eq!(info.exists, 0);
        assert!(info.unseen.is_none());
        assert!(info.highest_modseq.is_none());
        assert!(info.flags.is_empty());
        assert!(!info.read_only);
    }
}
