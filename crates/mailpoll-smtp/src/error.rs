//! Error types for SMTP operations.

use std::io;

use mailpoll_core::codes as core_codes;

use crate::types::ReplyCode;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable SMTP error codes reported in status records.
pub mod codes {
    /// Malformed or unexpected server reply.
    pub const RESPONSE: i32 = -100;
    /// Sender address failed syntax validation.
    pub const INVALID_SENDER_EMAIL: i32 = -103;
    /// No recipient address passed syntax validation.
    pub const INVALID_RECIPIENT_EMAIL: i32 = -104;
    /// Writing the envelope (`MAIL FROM`/`RCPT TO`) failed.
    pub const SEND_HEADER: i32 = -105;
    /// Writing message content failed.
    pub const SEND_BODY: i32 = -106;
    /// Writing `DATA` or the terminator failed.
    pub const SEND_DATA: i32 = -107;
    /// Operation refused in the current engine state.
    pub const PROCESSING: i32 = -108;
}

/// Phase in which a write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Greeting, TLS, authentication and `QUIT` commands.
    Command,
    /// `MAIL FROM` and `RCPT TO`.
    Envelope,
    /// Message headers and content.
    Body,
    /// `DATA` and the lone-dot terminator.
    Data,
}

impl WriteStage {
    const fn code(self) -> i32 {
        match self {
            Self::Command => core_codes::TCP_SEND_DATA,
            Self::Envelope => codes::SEND_HEADER,
            Self::Body => codes::SEND_BODY,
            Self::Data => codes::SEND_DATA,
        }
    }
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP connect failed.
    #[error("connection failed: {0}")]
    Connection(#[source] io::Error),

    /// Operation needs an open connection.
    #[error("not connected")]
    NotConnected,

    /// No reply arrived in time.
    #[error("timed out waiting for {0}")]
    ConnectionTimeout(&'static str),

    /// The TLS hook reported failure or none was installed.
    #[error("TLS handshake failed")]
    TlsHandshake,

    /// Write failed.
    #[error("write failed during {stage:?}: {source}")]
    Write {
        /// Phase the write belonged to.
        stage: WriteStage,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Read failed.
    #[error("read failed: {0}")]
    ReadData(#[source] io::Error),

    /// Sending requires authentication first.
    #[error("not authenticated")]
    Unauthenticated,

    /// Server rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No offered mechanism fits the credentials.
    #[error("no supported authentication mechanism")]
    MechanismNotSupported,

    /// Server returned an error reply.
    #[error("SMTP error {code}: {message}")]
    Reply {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (malformed or unexpected reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid sender address.
    #[error("invalid sender address: {0}")]
    InvalidSender(String),

    /// No valid recipient address.
    #[error("no valid recipient address")]
    InvalidRecipient,

    /// Another operation is in flight.
    #[error("engine busy with another operation")]
    Busy,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn reply(code: u16, message: impl Into<String>) -> Self {
        Self::Reply {
            code,
            message: message.into(),
        }
    }

    pub(crate) const fn write(stage: WriteStage, source: io::Error) -> Self {
        Self::Write { stage, source }
    }

    /// Stable numeric code; server rejections report their reply code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Connection(_) => core_codes::TCP_CONNECTION,
            Self::NotConnected => core_codes::TCP_NOT_CONNECTED,
            Self::ConnectionTimeout(_) => core_codes::TCP_CONNECTION_TIMEOUT,
            Self::TlsHandshake => core_codes::TCP_TLS_HANDSHAKE,
            Self::Write { stage, .. } => stage.code(),
            Self::ReadData(_) => core_codes::TCP_READ_DATA,
            Self::Unauthenticated => core_codes::AUTH_UNAUTHENTICATE,
            Self::Authentication(_) => core_codes::AUTH_AUTHENTICATION,
            Self::MechanismNotSupported => core_codes::AUTH_OAUTH2_NOT_SUPPORTED,
            Self::Reply { code, .. } => i32::from(*code),
            Self::Protocol(_) => codes::RESPONSE,
            Self::InvalidSender(_) => codes::INVALID_SENDER_EMAIL,
            Self::InvalidRecipient => codes::INVALID_RECIPIENT_EMAIL,
            Self::Busy => codes::PROCESSING,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Reply { code, .. } if ReplyCode::new(*code).is_permanent())
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Reply { code, .. } if ReplyCode::new(*code).is_transient())
    }

    /// Returns true for errors detected before anything was written.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidSender(_) | Self::InvalidRecipient | Self::Busy | Self::Unauthenticated
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
    fn reply_classification() {
        let err = Error::reply(550, "mailbox unavailable");
        assert!(err.is_permanent());
        assert!(!err.is_transient());
        assert_eq!(err.code(), 550);
        assert_eq!(err.to_string(), "SMTP error 550: mailbox unavailable");

        let err = Error::reply(451, "try later");
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn stable_codes() {
        assert_eq!(Error::NotConnected.code(), -2);
        assert_eq!(Error::TlsHandshake.code(), -4);
        assert_eq!(Error::InvalidSender("x".into()).code(), -103);
        assert_eq!(Error::InvalidRecipient.code(), -104);
        assert_eq!(Error::MechanismNotSupported.code(), -202);
        assert_eq!(Error::Protocol("bad".into()).code(), -100);
        assert_eq!(
            Error::write(WriteStage::Body, io::ErrorKind::BrokenPipe.into()).code(),
            -106
        );
        assert_eq!(
            Error::write(WriteStage::Command, io::ErrorKind::BrokenPipe.into()).code(),
            -5
        );
    }

    #[test]
    fn local_errors() {
        assert!(Error::InvalidRecipient.is_local());
        assert!(!Error::reply(550, "no").is_local());
    }
}
