//! Email address types.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        if is_valid(&addr) {
            Ok(Self(addr))
        } else {
            Err(Error::InvalidSender(addr))
        }
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks envelope address syntax.
///
/// Exactly one `@` with at least one character before it, and a domain
/// holding a `.` that is neither right after the `@` nor the last
/// character. Only letters, digits and `._-+` are accepted.
#[must_use]
pub fn is_valid(addr: &str) -> bool {
    let mut at = None;
    let mut last_dot = None;
    for (i, c) in addr.char_indices() {
        match c {
            '@' if at.is_some() => return false,
            '@' => at = Some(i),
            '.' => last_dot = Some(i),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+') => {}
            _ => return false,
        }
    }
    match (at, last_dot) {
        (Some(at), Some(dot)) => at >= 1 && dot >= at + 2 && dot + 1 < addr.len(),
        _ => false,
    }
}

/// Mailbox (optional display name + address).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mailbox {
    /// Display name, may be empty.
    pub name: String,
    /// Email address, validated when the envelope is built.
    pub email: String,
}

impl Mailbox {
    /// Creates a mailbox with just an address.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            email: email.into(),
        }
    }

    /// Creates a mailbox with a display name and address.
    #[must_use]
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Returns true when the address passes syntax validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid(&self.email)
    }

    /// Header form: `"Name" <email>` or `<email>`.
    #[must_use]
    pub fn header_value(&self) -> String {
        if self.name.is_empty() {
            format!("<{}>", self.email)
        } else {
            format!(
                "\"{}\" <{}>",
                mailpoll_mime::encoded_word::encode(&self.name),
                self.email
            )
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert!(is_valid("first.last+tag@mail.example.co"));
    }

    #[test]
    fn test_invalid_address_no_at() {
        assert!(Address::new("userexample.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty() {
        assert!(Address::new("").is_err());
    }

    #[test]
    fn test_invalid_address_empty_local() {
        assert!(Address::new("@example.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty_domain() {
        assert!(Address::new("user@").is_err());
    }

    #[test]
    fn test_invalid_address_domain_without_dot() {
        assert!(!is_valid("user@localhost"));
        assert!(!is_valid("user@.com"));
        assert!(!is_valid("user@example."));
    }

    #[test]
    fn test_invalid_address_two_at() {
        assert!(!is_valid("a@b@example.com"));
        assert!(!is_valid("a b@example.com"));
    }

    #[test]
    fn test_mailbox_header_value() {
        assert_eq!(
            Mailbox::with_name("John Doe", "john@example.com").header_value(),
            "\"John Doe\" <john@example.com>"
        );
        assert_eq!(Mailbox::new("a@b.cd").header_value(), "<a@b.cd>");
        assert!(Mailbox::new("a@b.cd").is_valid());
    }
}
