//! Parameters of search, fetch and append operations, and the checks run
//! on them before anything is written.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Flag, Flags};

/// Verbs a custom command may not use; the engine issues them itself.
pub const RESERVED_VERBS: &[&str] = &[
    "DONE",
    "LOGOUT",
    "STARTTLS",
    "IDLE",
    "ID",
    "CLOSE",
    "AUTHENTICATE",
    "LOGIN",
    "SELECT",
    "EXAMINE",
];

/// Verbs that change the mailbox list.
pub const MAILBOX_VERBS: &[&str] = &["CREATE", "DELETE", "RENAME"];

/// How search results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Most results reported.
    pub limit: usize,
    /// Report the highest numbers first.
    pub recent_first: bool,
    /// Fetch the headers of every reported message.
    pub fetch_envelopes: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: crate::config::DEFAULT_SEARCH_LIMIT,
            recent_first: true,
            fetch_envelopes: false,
        }
    }
}

impl From<&Config> for SearchOptions {
    fn from(config: &Config) -> Self {
        Self {
            limit: config.search_limit,
            recent_first: config.recent_first,
            fetch_envelopes: false,
        }
    }
}

impl SearchOptions {
    /// Enables header fetches for the results.
    #[must_use]
    pub const fn with_envelopes(mut self) -> Self {
        self.fetch_envelopes = true;
        self
    }

    /// Orders `found` and applies the limit.
    #[must_use]
    pub fn arrange(&self, mut found: Vec<u32>) -> Vec<u32> {
        found.sort_unstable();
        found.dedup();
        if self.recent_first {
            found.reverse();
        }
        found.truncate(self.limit);
        found
    }
}

/// Which message, and which parts of it, to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Sequence number or UID.
    pub number: u32,
    /// `number` is a UID.
    pub uid: bool,
    /// Stop after the headers.
    pub headers_only: bool,
    /// Sections to download; empty means every leaf part.
    pub sections: Vec<String>,
}

impl FetchRequest {
    /// Fetches message `number` by sequence number.
    #[must_use]
    pub const fn message(number: u32) -> Self {
        Self {
            number,
            uid: false,
            headers_only: false,
            sections: Vec::new(),
        }
    }

    /// Fetches the message with `uid`.
    #[must_use]
    pub const fn uid(uid: u32) -> Self {
        Self {
            number: uid,
            uid: true,
            headers_only: false,
            sections: Vec::new(),
        }
    }

    /// Fetches the headers only.
    #[must_use]
    pub const fn headers_only(mut self) -> Self {
        self.headers_only = true;
        self
    }

    /// Restricts the download to `section`. May be repeated.
    #[must_use]
    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.sections.push(section.into());
        self
    }

    /// Returns true if `section` should be downloaded.
    #[must_use]
    pub fn wants(&self, section: &str) -> bool {
        self.sections.is_empty() || self.sections.iter().any(|s| s == section)
    }
}

/// Flags and date for `APPEND`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Flags set on the stored message.
    pub flags: Flags,
    /// Internal date, e.g. `01-Jan-2024 10:00:00 +0000`.
    pub date: Option<String>,
}

impl AppendOptions {
    /// Adds a flag.
    #[must_use]
    pub fn flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Sets the internal date.
    #[must_use]
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}

/// Checks search criteria. Returns true for `UID SEARCH`.
///
/// # Errors
///
/// Returns [`Error::InvalidSearchCriteria`] unless the criteria start with
/// `SEARCH ` or `UID SEARCH ` and contain no `FETCH `.
pub fn check_search(criteria: &str) -> Result<bool> {
    let upper = criteria.trim_start().to_ascii_uppercase();
    let uid = upper.starts_with("UID SEARCH ");
    if !uid && !upper.starts_with("SEARCH ") {
        return Err(Error::InvalidSearchCriteria(
            "criteria must start with SEARCH or UID SEARCH".into(),
        ));
    }
    if upper.contains("FETCH ") {
        return Err(Error::InvalidSearchCriteria("FETCH is not allowed in a search".into()));
    }
    Ok(uid)
}

/// Returns true if the criteria use `MODSEQ`.
#[must_use]
pub fn uses_modseq(criteria: &str) -> bool {
    criteria.to_ascii_uppercase().contains("MODSEQ")
}

/// Uppercased verb of a command, skipping a leading `UID`.
#[must_use]
pub fn command_verb(text: &str) -> String {
    let mut words = text.split_ascii_whitespace().map(str::to_ascii_uppercase);
    match words.next() {
        Some(first) if first == "UID" => words.next().unwrap_or(first),
        Some(first) => first,
        None => String::new(),
    }
}

/// Checks a custom command against the reserved verbs.
///
/// # Errors
///
/// Returns [`Error::CommandNotAllowed`] for an empty or reserved verb.
pub fn check_custom(text: &str) -> Result<String> {
    let verb = command_verb(text);
    if verb.is_empty() || RESERVED_VERBS.contains(&verb.as_str()) {
        return Err(Error::CommandNotAllowed(verb));
    }
    Ok(verb)
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

    mod search_tests {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn accepts_search_forms() {
            assert!(!check_search("SEARCH UNSEEN").unwrap());
            assert!(check_search("uid search FROM \"joe\"").unwrap());
        }

        #[test]
        fn rejects_bad_criteria() {
            assert!(matches!(
                check_search("UNSEEN"),
                Err(Error::InvalidSearchCriteria(_))
            ));
            assert!(check_search("SEARCH").is_err());
            assert!(check_search("SEARCH ALL FETCH 1 BODY[]").is_err());
        }

        #[test]
        fn arrange_recent_first() {
            let opts = SearchOptions {
                limit: 3,
                recent_first: true,
                fetch_envelopes: false,
            };
            assert_eq!(opts.arrange(vec![4, 9, 1, 7, 2]), vec![9, 7, 4]);

            let opts = SearchOptions {
                recent_first: false,
                ..opts
            };
            assert_eq!(opts.arrange(vec![4, 9, 1, 7, 2]), vec![1, 2, 4]);
        }

        proptest! {
            #[test]
            fn arrange_is_ordered_and_bounded(
                found in proptest::collection::vec(1u32..500, 0..60),
                limit in 0usize..30,
                recent_first in any::<bool>(),
            ) {
                let opts = SearchOptions { limit, recent_first, fetch_envelopes: false };
                let out = opts.arrange(found.clone());
                prop_assert!(out.len() <= limit);
                prop_assert!(out.iter().all(|n| found.contains(n)));
                for pair in out.windows(2) {
                    if recent_first {
                        prop_assert!(pair[0] > pair[1]);
                    } else {
                        prop_assert!(pair[0] < pair[1]);
                    }
                }
            }
        }

        #[test]
        fn modseq_detected() {
            assert!(uses_modseq("SEARCH modseq 100"));
            assert!(!uses_modseq("SEARCH ALL"));
        }
    }

    mod custom_tests {
        use super::*;

        #[test]
        fn reserved_verbs_refused() {
            for text in ["IDLE", "select INBOX", "UID  LOGIN x", "done"] {
                assert!(
                    matches!(check_custom(text), Err(Error::CommandNotAllowed(_))),
                    "{text}"
                );
            }
            assert!(check_custom("").is_err());
        }

        #[test]
        fn other_verbs_allowed() {
            assert_eq!(check_custom("CREATE Archive").unwrap(), "CREATE");
            assert_eq!(check_custom("UID STORE 4 +FLAGS (\\Seen)").unwrap(), "STORE");
            assert_eq!(check_custom("NOOP").unwrap(), "NOOP");
        }
    }

    #[test]
    fn fetch_request_sections() {
        let all = FetchRequest::message(3);
        assert!(all.wants("2.1"));
        let some = FetchRequest::uid(40).section("1");
        assert!(some.uid);
        assert!(some.wants("1"));
        assert!(!some.wants("2"));
    }
}
