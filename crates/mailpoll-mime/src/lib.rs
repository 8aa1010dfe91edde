//! # mailpoll-mime
//!
//! Streaming MIME codecs sized for memory-constrained targets.
//!
//! ## Features
//!
//! - **Stream cursor**: one read/seek interface over buffers, constant data
//!   and files
//! - **Bounded encoders**: base64 in 57-byte lines, quoted-printable with
//!   optional RFC 3676 flowed breaks, CRLF-normalized 7bit/8bit text
//! - **Streaming decoders**: accept network data split anywhere, never fail
//! - **Charsets**: ISO-8859-1, TIS-620, ISO-8859-11 and windows-874 to UTF-8
//! - **Headers**: RFC 2047 encoded words, media types, flowed text
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpoll_mime::{ChunkEncoder, Cursor, TransferEncoding};
//!
//! let mut cursor = Cursor::from_static(b"attachment bytes");
//! let mut encoder = ChunkEncoder::new(TransferEncoding::Base64, false);
//! let mut line = Vec::new();
//! while encoder.next_chunk(&mut cursor, &mut line) {
//!     transport.write_all(&line)?;
//!     line.clear();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`charset`]: Single-byte charset transcoding
//! - [`cursor`]: Stream cursor
//! - [`encoded_word`]: RFC 2047 header words
//! - [`encoding`]: Transfer encodings
//! - [`flowed`]: RFC 3676 flowed text
//! - [`media`]: Media types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod charset;
pub mod cursor;
pub mod encoded_word;
pub mod encoding;
pub mod error;
pub mod flowed;
pub mod media;

pub use charset::Charset;
pub use cursor::{Cursor, CursorStats};
pub use encoding::{ChunkEncoder, Decoder, TransferEncoding};
pub use error::{Error, Result};
pub use media::{ContentType, MultipartKind, infer_from_filename};
