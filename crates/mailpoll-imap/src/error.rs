//! Error types for IMAP operations.

use std::io;

use mailpoll_core::codes as core_codes;
use thiserror::Error;

/// Result type alias for IMAP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable IMAP error codes reported in status records.
pub mod codes {
    /// Server answered NO/BAD, or the response could not be parsed.
    pub const RESPONSE: i32 = -100;
    /// Operation needs a selected mailbox.
    pub const NO_MAILBOX: i32 = -101;
    /// Search criteria failed validation.
    pub const INVALID_SEARCH_CRITERIA: i32 = -102;
    /// MODSEQ used without CONDSTORE support.
    pub const MODSEQ_NOT_SUPPORTED: i32 = -103;
    /// Server does not advertise IDLE.
    pub const IDLE_NOT_SUPPORTED: i32 = -104;
    /// Message number or UID does not exist.
    pub const MESSAGE_NOT_EXISTS: i32 = -105;
    /// Operation refused in the current engine state.
    pub const PROCESSING: i32 = -106;
    /// Mailbox is not in the listed mailbox set.
    pub const MAILBOX_NOT_EXISTS: i32 = -107;
    /// No data handler or download target installed.
    pub const NO_CALLBACK: i32 = -108;
    /// Custom command uses a verb the engine manages itself.
    pub const COMMAND_NOT_ALLOWED: i32 = -109;
}

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP connect failed.
    #[error("connection failed: {0}")]
    Connection(#[source] io::Error),

    /// Operation needs an open connection.
    #[error("not connected")]
    NotConnected,

    /// No response arrived in time.
    #[error("timed out waiting for {0}")]
    ConnectionTimeout(&'static str),

    /// The TLS hook reported failure or none was installed.
    #[error("TLS handshake failed")]
    TlsHandshake,

    /// Write failed.
    #[error("send failed: {0}")]
    SendData(#[source] io::Error),

    /// Read failed.
    #[error("read failed: {0}")]
    ReadData(#[source] io::Error),

    /// Operation needs an authenticated session.
    #[error("not authenticated")]
    Unauthenticated,

    /// Server rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No offered mechanism fits the credentials.
    #[error("no supported authentication mechanism")]
    MechanismNotSupported,

    /// Server returned NO.
    #[error("server returned NO: {0}")]
    No(String),

    /// Server returned BAD.
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE outside of LOGOUT.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// Response text did not follow the grammar.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte offset where parsing stopped.
        position: usize,
        /// What was expected.
        message: String,
    },

    /// Unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Search criteria failed validation.
    #[error("invalid search criteria: {0}")]
    InvalidSearchCriteria(String),

    /// No mailbox selected.
    #[error("no mailbox selected")]
    NoMailbox,

    /// Mailbox missing from the listed set.
    #[error("mailbox does not exist: {0}")]
    MailboxNotFound(String),

    /// Message number or UID out of range, or the server returned nothing.
    #[error("message {0} does not exist")]
    MessageNotFound(u32),

    /// MODSEQ criteria without CONDSTORE.
    #[error("MODSEQ is not supported by this mailbox")]
    ModseqNotSupported,

    /// Server does not support IDLE.
    #[error("IDLE is not supported")]
    IdleNotSupported,

    /// Fetch needs a data handler or a download target.
    #[error("no data handler installed")]
    NoDataHandler,

    /// Custom command verb is reserved.
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    /// Another operation is in flight.
    #[error("engine busy with another operation")]
    Busy,
}

impl Error {
    /// Creates a parse error at `position`.
    #[must_use]
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Stable numeric code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Connection(_) => core_codes::TCP_CONNECTION,
            Self::NotConnected => core_codes::TCP_NOT_CONNECTED,
            Self::ConnectionTimeout(_) => core_codes::TCP_CONNECTION_TIMEOUT,
            Self::TlsHandshake => core_codes::TCP_TLS_HANDSHAKE,
            Self::SendData(_) => core_codes::TCP_SEND_DATA,
            Self::ReadData(_) => core_codes::TCP_READ_DATA,
            Self::Unauthenticated => core_codes::AUTH_UNAUTHENTICATE,
            Self::Authentication(_) => core_codes::AUTH_AUTHENTICATION,
            Self::MechanismNotSupported => core_codes::AUTH_OAUTH2_NOT_SUPPORTED,
            Self::No(_) | Self::Bad(_) | Self::Bye(_) | Self::Parse { .. } | Self::Protocol(_) => {
                codes::RESPONSE
            }
            Self::InvalidSearchCriteria(_) => codes::INVALID_SEARCH_CRITERIA,
            Self::NoMailbox => codes::NO_MAILBOX,
            Self::MailboxNotFound(_) => codes::MAILBOX_NOT_EXISTS,
            Self::MessageNotFound(_) => codes::MESSAGE_NOT_EXISTS,
            Self::ModseqNotSupported => codes::MODSEQ_NOT_SUPPORTED,
            Self::IdleNotSupported => codes::IDLE_NOT_SUPPORTED,
            Self::NoDataHandler => codes::NO_CALLBACK,
            Self::CommandNotAllowed(_) => codes::COMMAND_NOT_ALLOWED,
            Self::Busy => codes::PROCESSING,
        }
    }

    /// Returns true when the connection can no longer be used.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout(_)
                | Self::TlsHandshake
                | Self::SendData(_)
                | Self::ReadData(_)
                | Self::Bye(_)
        )
    }

    /// Returns true for errors detected before anything was written.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidSearchCriteria(_)
                | Self::NoMailbox
                | Self::MailboxNotFound(_)
                | Self::ModseqNotSupported
                | Self::IdleNotSupported
                | Self::NoDataHandler
                | Self::CommandNotAllowed(_)
                | Self::Busy
                | Self::Unauthenticated
        )
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
    fn stable_codes() {
        assert_eq!(Error::No("x".into()).code(), -100);
        assert_eq!(Error::NoMailbox.code(), -101);
        assert_eq!(Error::InvalidSearchCriteria("x".into()).code(), -102);
        assert_eq!(Error::ModseqNotSupported.code(), -103);
        assert_eq!(Error::IdleNotSupported.code(), -104);
        assert_eq!(Error::MessageNotFound(9).code(), -105);
        assert_eq!(Error::Busy.code(), -106);
        assert_eq!(Error::MailboxNotFound("x".into()).code(), -107);
        assert_eq!(Error::NoDataHandler.code(), -108);
        assert_eq!(Error::CommandNotAllowed("IDLE".into()).code(), -109);
        assert_eq!(Error::TlsHandshake.code(), -4);
        assert_eq!(Error::Authentication("no".into()).code(), -201);
    }

    #[test]
    fn broken_versus_local() {
        assert!(Error::ReadData(io::ErrorKind::UnexpectedEof.into()).is_broken());
        assert!(Error::Bye("shutting down".into()).is_broken());
        assert!(!Error::No("nope".into()).is_broken());
        assert!(Error::NoMailbox.is_local());
        assert!(!Error::No("nope".into()).is_local());
    }

    #[test]
    fn parse_error_display() {
        let err = Error::parse(7, "expected '('");
        assert_eq!(err.to_string(), "parse error at position 7: expected '('");
    }
}
