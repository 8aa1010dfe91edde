//! # mailpoll-core
//!
//! Building blocks shared by the mailpoll IMAP and SMTP engines.
//!
//! ## Features
//!
//! - **Poll results**: the tri-state [`PollResult`] every engine step returns
//! - **Timers**: [`Timer`] countdowns over a swappable [`Clock`]
//! - **Transport hook**: the [`Transport`] trait engines drive, plus a
//!   scripted [`MockTransport`] and (feature `tls`) a rustls-backed
//!   [`TcpTransport`]
//! - **Status reporting**: [`Status`] records delivered to a [`StatusSink`],
//!   logged through `tracing` by default
//! - **SASL**: PLAIN, LOGIN and XOAUTH2 responses and mechanism selection
//! - **Storage hook**: [`FileStore`] for file-backed attachments and downloads
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpoll_core::{PollResult, TcpTransport, Transport};
//!
//! let mut transport = TcpTransport::new();
//! transport.connect("imap.example.com", 993)?;
//! let secured = (TcpTransport::tls_hook())(&mut transport);
//! ```
//!
//! ## Modules
//!
//! - [`file`]: Storage hook
//! - [`reader`]: Non-blocking line framing
//! - [`sasl`]: SASL helpers and credentials
//! - [`status`]: Poll results, status records, progress throttling
//! - [`time`]: Clocks and timers
//! - [`transport`]: Transport trait and mock

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod file;
#[cfg(feature = "tls")]
pub mod net;
pub mod reader;
pub mod sasl;
pub mod status;
pub mod time;
pub mod transport;

pub use file::{FileHandle, FileMode, FileStore, FsStore};
#[cfg(feature = "tls")]
pub use net::TcpTransport;
pub use reader::LineReader;
pub use sasl::{Credentials, Mechanism, MechanismSet};
pub use status::{
    CollectingStatus, PollResult, ProgressTracker, Status, StatusSink, TracingStatus, codes,
};
pub use time::{Clock, MockClock, SharedClock, SystemClock, Timer};
pub use transport::{MockTransport, TlsHook, Transport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
