//! IMAP response parser.
//!
//! Responses are assembled line by line (literals folded in by the
//! [`ResponseAccumulator`]) and then walked by the quote- and
//! parenthesis-aware [`Tokenizer`].
//!
//! # Example
//!
//! ```
//! use mailpoll_imap::parser::{Response, Untagged};
//!
//! let response = Response::parse("* 23 EXISTS\r\n").unwrap();
//! assert_eq!(response, Response::Untagged(Untagged::Exists(23)));
//! ```

pub mod body;
pub mod envelope;
pub mod response;
pub mod tokenizer;

pub use body::{BodyPart, BodyStructure, Field, FieldKind};
pub use envelope::{Address, Envelope};
pub use response::{
    Completion, FetchData, Response, ResponseAccumulator, Untagged, classify_tagged,
    literal_length, section_of,
};
pub use tokenizer::{Token, Tokenizer, quote, skip_list};
