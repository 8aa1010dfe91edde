//! # mailpoll-imap
//!
//! A non-blocking IMAP client engine (RFC 3501) for targets without an
//! async runtime. Message parts are streamed to a handler or a file as they
//! arrive, so memory use stays bounded regardless of message size.
//!
//! ## Features
//!
//! - **Poll-driven session**: every [`ImapClient::poll`] does one bounded
//!   step and returns a [`PollResult`](mailpoll_core::PollResult)
//! - **TLS**: implicit TLS (port 993) and STARTTLS through a caller-supplied
//!   hook
//! - **Authentication**: `LOGIN`, PLAIN and XOAUTH2 with SASL-IR, then `ID`
//! - **Mailboxes**: LIST, SELECT, EXAMINE, CLOSE with CONDSTORE awareness
//! - **Search**: validated criteria, result ordering and limits, optional
//!   header fetch per result
//! - **Streaming fetch**: headers, body structure, then every part decoded
//!   from base64 or quoted-printable and transcoded to UTF-8
//! - **IDLE**: mailbox events delivered while polling, with automatic
//!   `DONE` before the next command
//! - **APPEND**: messages composed with `mailpoll-smtp` and streamed as a
//!   literal
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpoll_core::{Credentials, TcpTransport};
//! use mailpoll_imap::{Config, FetchRequest, ImapClient, LoggingHandler};
//!
//! let config = Config::builder("imap.example.com")
//!     .download_dir("/sd/mail")
//!     .build();
//! let mut client = ImapClient::new(TcpTransport::new(), config)
//!     .with_tls_hook(TcpTransport::tls_hook())
//!     .with_data_handler(LoggingHandler);
//!
//! client.authenticate(Credentials::password("user@example.com", "secret"))?;
//! client.run()?;
//!
//! client.select("INBOX")?;
//! client.run()?;
//!
//! client.search("SEARCH UNSEEN")?;
//! client.run()?;
//!
//! if let Some(&newest) = client.search_results().first() {
//!     client.fetch(FetchRequest::message(newest))?;
//!     client.run()?;
//! }
//!
//! client.logout()?;
//! client.run()?;
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Session engine
//! - [`command`]: Command serialization and tags
//! - [`config`]: Session configuration
//! - [`fetch`]: Streaming part decode
//! - [`handler`]: Data callbacks
//! - [`parser`]: Response parser
//! - [`request`]: Operation parameters and validation
//! - [`types`]: Core IMAP types (capabilities, flags, mailboxes)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod command;
pub mod config;
mod error;
pub mod fetch;
pub mod handler;
pub mod parser;
pub mod request;
pub mod types;

pub use client::{ImapClient, ImapState, SELECT_DEDUP_WINDOW};
pub use command::{Command, FetchItems, TagGenerator};
pub use config::{Config, ConfigBuilder, Security};
pub use error::{Error, Result, codes};
pub use fetch::PartDownload;
pub use handler::{
    CollectingHandler, DataEvent, DataHandler, IdleEvent, LoggingHandler, MessageHeader,
    NoopHandler, PartData, SearchResult,
};
pub use parser::{BodyPart, BodyStructure, Envelope, FetchData, Response, Untagged};
pub use request::{AppendOptions, FetchRequest, SearchOptions};
pub use types::{
    Capabilities, Capability, Flag, Flags, ListEntry, MailboxAttribute, MailboxInfo,
    ResponseCode, ResponseStatus,
};

/// Crate version, sent in `ID`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
