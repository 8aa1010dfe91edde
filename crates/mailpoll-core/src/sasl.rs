//! SASL authentication helpers shared by IMAP and SMTP.
//!
//! Implements:
//! - PLAIN (RFC 4616)
//! - LOGIN (legacy two-step username/password)
//! - XOAUTH2 (Google/Microsoft bearer token)
//!
//! Mechanism selection is capability driven: XOAUTH2 when the server offers
//! it and an access token is present, then PLAIN, then LOGIN.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// SASL mechanism the engines know how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// `XOAUTH2` bearer token.
    XOAuth2,
    /// PLAIN username/password.
    Plain,
    /// LOGIN username/password in two round-trips.
    Login,
}

impl Mechanism {
    /// Parses a mechanism name as advertised by a server.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "XOAUTH2" => Some(Self::XOAuth2),
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::XOAuth2 => "XOAUTH2",
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::XOAuth2 => 1,
            Self::Plain => 2,
            Self::Login => 4,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of mechanisms offered by a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MechanismSet(u8);

impl MechanismSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Adds a mechanism.
    pub const fn insert(&mut self, mechanism: Mechanism) {
        self.0 |= mechanism.bit();
    }

    /// Removes a mechanism.
    pub const fn remove(&mut self, mechanism: Mechanism) {
        self.0 &= !mechanism.bit();
    }

    /// Returns true if the mechanism is offered.
    #[must_use]
    pub const fn contains(self, mechanism: Mechanism) -> bool {
        self.0 & mechanism.bit() != 0
    }

    /// Returns true if nothing is offered.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Mechanism> for MechanismSet {
    fn from_iter<I: IntoIterator<Item = Mechanism>>(iter: I) -> Self {
        let mut set = Self::new();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

/// Login credentials.
///
/// Held only until authentication resolves; the engines call
/// [`clear`](Self::clear) on success and on permanent failure. Every copy
/// is wiped when dropped.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    user: String,
    password: Option<String>,
    access_token: Option<String>,
}

impl Credentials {
    /// Username/password credentials.
    #[must_use]
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
            access_token: None,
        }
    }

    /// `OAuth2` access-token credentials.
    #[must_use]
    pub fn access_token(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            access_token: Some(token.into()),
        }
    }

    /// Adds a password alongside an access token.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Adds an access token alongside a password.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Authentication identity.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password, if any.
    #[must_use]
    pub fn secret_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Access token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.password.is_none() && self.access_token.is_none()
    }

    /// Overwrites and drops every stored secret.
    pub fn clear(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Picks the mechanism to use for the given credentials.
///
/// Returns `None` when no offered mechanism fits the credential shape.
#[must_use]
pub fn choose_mechanism(offered: MechanismSet, creds: &Credentials) -> Option<Mechanism> {
    if creds.token().is_some() && offered.contains(Mechanism::XOAuth2) {
        return Some(Mechanism::XOAuth2);
    }
    if creds.secret_password().is_some() && offered.contains(Mechanism::Plain) {
        return Some(Mechanism::Plain);
    }
    if creds.secret_password().is_some() && offered.contains(Mechanism::Login) {
        return Some(Mechanism::Login);
    }
    None
}

/// PLAIN initial response: base64 of `\0<user>\0<password>`.
#[must_use]
pub fn plain_response(username: &str, password: &str) -> Zeroizing<String> {
    let raw = Zeroizing::new(format!("\0{username}\0{password}"));
    Zeroizing::new(STANDARD.encode(raw.as_bytes()))
}

/// XOAUTH2 initial response: base64 of `user=<user>\x01auth=Bearer <token>\x01\x01`.
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> Zeroizing<String> {
    let raw = Zeroizing::new(format!("user={user}\x01auth=Bearer {token}\x01\x01"));
    Zeroizing::new(STANDARD.encode(raw.as_bytes()))
}

/// Base64 of a single LOGIN step value (username or password).
#[must_use]
pub fn login_response(value: &str) -> Zeroizing<String> {
    Zeroizing::new(STANDARD.encode(value))
}

/// Decodes a server challenge, returning lossy text.
#[must_use]
pub fn decode_challenge(challenge: &str) -> String {
    STANDARD
        .decode(challenge.trim())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Error document sent by XOAUTH2 servers inside a `+`/`334` challenge.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct OAuthError {
    /// HTTP-like status code.
    pub status: String,
    /// Supported schemes.
    #[serde(default)]
    pub schemes: String,
    /// Required scope.
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.status)?;
        if let Some(scope) = &self.scope {
            write!(f, ", scope {scope}")?;
        }
        Ok(())
    }
}

/// Parses an `OAuth2` error document.
///
/// # Errors
///
/// Returns an error if the text is not the expected JSON shape.
pub fn parse_oauth_error(json: &str) -> Result<OAuthError, serde_json::Error> {
    serde_json::from_str(json)
}

/// Interprets a base64 XOAUTH2 challenge.
///
/// Returns a failure description when the challenge carries an error
/// document, `None` for an ordinary continuation.
#[must_use]
pub fn xoauth2_failure(challenge: &str) -> Option<String> {
    let text = decode_challenge(challenge);
    if !text.contains("\"status\":") {
        return None;
    }
    Some(parse_oauth_error(&text).map_or(text, |e| e.to_string()))
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

    fn decoded(s: &str) -> String {
        String::from_utf8(STANDARD.decode(s).unwrap()).unwrap()
    }

    mod response_tests {
        use super::*;

        #[test]
        fn plain_format() {
            assert_eq!(decoded(&plain_response("test", "pass")), "\0test\0pass");
        }

        #[test]
        fn plain_special_chars() {
            assert_eq!(
                decoded(&plain_response("user", "pass@word!")),
                "\0user\0pass@word!"
            );
        }

        #[test]
        fn xoauth2_format() {
            assert_eq!(
                decoded(&xoauth2_response("test@test.com", "abc")),
                "user=test@test.com\x01auth=Bearer abc\x01\x01"
            );
        }

        #[test]
        fn login_steps() {
            assert_eq!(login_response("user").as_str(), "dXNlcg==");
            assert_eq!(decode_challenge("VXNlcm5hbWU6"), "Username:");
            assert_eq!(decode_challenge("UGFzc3dvcmQ6\r\n"), "Password:");
        }

        #[test]
        fn responses_hide_plaintext() {
            let r = xoauth2_response("user@example.com", "token");
            assert!(!r.contains("user@example.com"));
            assert!(STANDARD.decode(r.as_bytes()).is_ok());
        }
    }

    mod oauth_error_tests {
        use super::*;

        #[test]
        fn parses_error_document() {
            let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
            let error = parse_oauth_error(json).unwrap();
            assert_eq!(error.status, "401");
            assert_eq!(error.schemes, "bearer");
            assert_eq!(error.scope.as_deref(), Some("https://mail.google.com/"));
        }

        #[test]
        fn challenge_with_status_is_failure() {
            let challenge = STANDARD.encode(r#"{"status":"400","schemes":"Bearer"}"#);
            assert_eq!(xoauth2_failure(&challenge).as_deref(), Some("status 400"));
        }

        #[test]
        fn ordinary_challenge_is_not_failure() {
            assert_eq!(xoauth2_failure(""), None);
            assert_eq!(xoauth2_failure(&STANDARD.encode("hello")), None);
        }
    }

    mod chooser_tests {
        use super::*;

        #[test]
        fn xoauth2_wins_when_token_and_capability_present() {
            let offered: MechanismSet = [Mechanism::XOAuth2].into_iter().collect();
            let creds = Credentials::access_token("u", "t").with_password("p");
            assert_eq!(choose_mechanism(offered, &creds), Some(Mechanism::XOAuth2));

            let all: MechanismSet = [Mechanism::Plain, Mechanism::Login, Mechanism::XOAuth2]
                .into_iter()
                .collect();
            assert_eq!(choose_mechanism(all, &creds), Some(Mechanism::XOAuth2));
        }

        #[test]
        fn plain_before_login() {
            let offered: MechanismSet = [Mechanism::Login, Mechanism::Plain].into_iter().collect();
            let creds = Credentials::password("u", "p");
            assert_eq!(choose_mechanism(offered, &creds), Some(Mechanism::Plain));
        }

        #[test]
        fn login_fallback() {
            let offered: MechanismSet = [Mechanism::Login].into_iter().collect();
            let creds = Credentials::password("u", "p");
            assert_eq!(choose_mechanism(offered, &creds), Some(Mechanism::Login));
        }

        #[test]
        fn token_without_capability_falls_back_to_password() {
            let offered: MechanismSet = [Mechanism::Plain].into_iter().collect();
            let creds = Credentials::access_token("u", "t").with_password("p");
            assert_eq!(choose_mechanism(offered, &creds), Some(Mechanism::Plain));
        }

        #[test]
        fn nothing_fits() {
            let offered: MechanismSet = [Mechanism::Plain].into_iter().collect();
            let creds = Credentials::access_token("u", "t");
            assert_eq!(choose_mechanism(offered, &creds), None);
            assert_eq!(choose_mechanism(MechanismSet::new(), &Credentials::password("u", "p")), None);
        }
    }

    mod credentials_tests {
        use super::*;

        #[test]
        fn clear_empties_everything() {
            let mut creds = Credentials::password("user", "secret").with_access_token("tok");
            creds.clear();
            assert!(creds.is_empty());
            assert_eq!(creds.token(), None);
        }

        fn wiped_on_drop<T: ZeroizeOnDrop>(_: &T) {}

        #[test]
        fn secrets_are_wiped_on_drop() {
            wiped_on_drop(&Credentials::password("user", "secret"));
            wiped_on_drop(&plain_response("user", "secret"));
            wiped_on_drop(&login_response("secret"));
        }

        #[test]
        fn clone_is_independent_of_clear() {
            let original = Credentials::password("user", "secret");
            let mut copy = original.clone();
            copy.clear();
            assert!(copy.is_empty());
            assert_eq!(original.secret_password(), Some("secret"));
        }

        #[test]
        fn debug_redacts_secrets() {
            let creds = Credentials::password("user", "hunter2");
            let text = format!("{creds:?}");
            assert!(text.contains("user"));
            assert!(!text.contains("hunter2"));
        }
    }
}
