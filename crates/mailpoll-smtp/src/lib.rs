//! # mailpoll-smtp
//!
//! A non-blocking SMTP client engine (RFC 5321) that streams multipart
//! messages in bounded chunks.
//!
//! ## Features
//!
//! - **Poll-driven session**: every [`SmtpClient::poll`] does one bounded
//!   step and returns a [`PollResult`](mailpoll_core::PollResult)
//! - **TLS**: implicit TLS (port 465) and STARTTLS through a caller-supplied
//!   hook
//! - **Authentication**: PLAIN, LOGIN and XOAUTH2, chosen from the `EHLO`
//!   capabilities and the credential shape
//! - **Multipart planning**: mixed, related, alternative and parallel
//!   containers derived from the declared content
//! - **Streaming**: text, html, attachments and embedded `message/rfc822`
//!   parts are encoded one line at a time, from memory or from files
//! - **Extensions**: 8BITMIME, BINARYMIME, DSN, SIZE, PIPELINING, SMTPUTF8
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpoll_core::{Credentials, TcpTransport};
//! use mailpoll_smtp::{Attachment, Config, OutboundMessage, SmtpClient, TextBody};
//!
//! let config = Config::new("smtp.example.com");
//! let mut client = SmtpClient::new(TcpTransport::new(), config)
//!     .with_tls_hook(TcpTransport::tls_hook());
//!
//! client.authenticate(Credentials::password("user@example.com", "secret"))?;
//! client.run()?;
//!
//! let message = OutboundMessage::new()
//!     .from("Me", "user@example.com")
//!     .to("You", "friend@example.com")
//!     .subject("Report")
//!     .text(TextBody::plain("See attached."))
//!     .attach(Attachment::from_file("/reports/march.pdf"));
//! client.send(&message)?;
//! client.run()?;
//!
//! client.quit()?;
//! client.run()?;
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Session engine
//! - [`command`]: SMTP command builders
//! - [`config`]: Session configuration
//! - [`message`]: Outbound message model
//! - [`parser`]: Reply parser
//! - [`planner`]: Multipart planning
//! - [`render`]: Header and boundary text
//! - [`send`]: Streaming send machine
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod command;
pub mod config;
mod error;
pub mod message;
pub mod parser;
pub mod planner;
pub mod render;
pub mod send;
pub mod types;

pub use client::{SmtpClient, SmtpState};
pub use command::{BodyType, Command, Notify};
pub use config::{Config, ConfigBuilder, Security};
pub use error::{Error, Result, WriteStage, codes};
pub use message::{
    Attachment, AttachmentKind, AttachmentSource, EmbeddedMessage, OutboundMessage, Priority,
    TextBody,
};
pub use planner::{Plan, Step};
pub use send::{SendEvent, SendMachine, SendOptions};
pub use types::{Address, Capabilities, Extension, Mailbox, Reply, ReplyCode};

/// SMTP protocol version supported.
pub const SMTP_VERSION: &str = "SMTP/ESMTP (RFC 5321)";
