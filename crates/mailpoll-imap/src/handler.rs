//! Data callbacks for fetch, search, IDLE and custom commands.
//!
//! The engine hands every piece of mailbox data it receives to a
//! [`DataHandler`]. All methods have empty defaults, so an implementation
//! only overrides what it needs.
//!
//! # Example
//!
//! ```ignore
//! use mailpoll_imap::handler::{DataHandler, PartData};
//!
//! struct Saver(Vec<u8>);
//!
//! impl DataHandler for Saver {
//!     fn on_part(&mut self, part: &PartData<'_>) {
//!         self.0.extend_from_slice(part.data);
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{Flags, ListEntry};

/// Headers of one message, from `FETCH n FULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Sequence number, or the UID for UID fetches.
    pub number: u32,
    /// UID when the server reported one.
    pub uid: Option<u32>,
    /// Header name/value pairs: envelope fields, then `Flags`,
    /// `Internal-Date`, `Size` and `Attachments`.
    pub headers: Vec<(String, String)>,
}

impl MessageHeader {
    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One decoded run of a body part.
#[derive(Debug, Clone, Copy)]
pub struct PartData<'a> {
    /// Message number or UID.
    pub number: u32,
    /// Section address such as `1.2`.
    pub section: &'a str,
    /// Lowercase `type/subtype`.
    pub mime: &'a str,
    /// Attachment file name, if any.
    pub filename: Option<&'a str>,
    /// Download path when the part is also written to a file.
    pub path: Option<&'a str>,
    /// Offset of `data` in the decoded part.
    pub offset: u64,
    /// Decoded bytes; text parts are UTF-8.
    pub data: &'a [u8],
    /// Encoded size announced by the server.
    pub size: u64,
    /// True on the last call for this part.
    pub complete: bool,
    /// Percent of the encoded size received.
    pub progress: u8,
}

/// Result of a `SEARCH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Matching numbers after ordering and the result limit.
    pub numbers: Vec<u32>,
    /// Number of matches before the limit.
    pub total: usize,
    /// True when the numbers are UIDs.
    pub uid: bool,
}

/// Mailbox change reported while idling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    /// Mailbox now holds this many messages.
    Exists(u32),
    /// Message with this sequence number was removed.
    Expunge(u32),
    /// Number of recent messages.
    Recent(u32),
    /// Flags of a message changed.
    Flags {
        /// Sequence number.
        number: u32,
        /// New flag set.
        flags: Flags,
    },
}

/// Receiver of mailbox data.
pub trait DataHandler: Send {
    /// Called once per fetched message header set.
    fn on_envelope(&mut self, header: &MessageHeader) {
        let _ = header;
    }

    /// Called for each decoded run of a body part.
    fn on_part(&mut self, part: &PartData<'_>) {
        let _ = part;
    }

    /// Called when a search completes.
    fn on_search(&mut self, result: &SearchResult) {
        let _ = result;
    }

    /// Called for each mailbox change while idling.
    fn on_idle(&mut self, event: &IdleEvent) {
        let _ = event;
    }

    /// Called for each mailbox returned by `LIST`.
    fn on_mailbox(&mut self, entry: &ListEntry) {
        let _ = entry;
    }

    /// Called with every response line of a custom command.
    fn on_command_response(&mut self, command: &str, line: &str) {
        let _ = (command, line);
    }
}

/// Ignores all data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl DataHandler for NoopHandler {}

/// Logs data through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl DataHandler for LoggingHandler {
    fn on_envelope(&mut self, header: &MessageHeader) {
        tracing::info!(
            number = header.number,
            subject = header.get("Subject").unwrap_or_default(),
            "message"
        );
    }

    fn on_part(&mut self, part: &PartData<'_>) {
        tracing::debug!(
            number = part.number,
            section = part.section,
            bytes = part.data.len(),
            complete = part.complete,
            "part data"
        );
    }

    fn on_search(&mut self, result: &SearchResult) {
        tracing::info!(total = result.total, numbers = ?result.numbers, "search");
    }

    fn on_idle(&mut self, event: &IdleEvent) {
        tracing::info!(?event, "mailbox changed");
    }

    fn on_mailbox(&mut self, entry: &ListEntry) {
        tracing::debug!(name = %entry.name, "mailbox");
    }

    fn on_command_response(&mut self, command: &str, line: &str) {
        tracing::debug!(command, line, "command response");
    }
}

/// Owned copy of a handler callback, recorded by [`CollectingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    /// [`DataHandler::on_envelope`].
    Envelope(MessageHeader),
    /// [`DataHandler::on_part`].
    Part {
        /// Message number or UID.
        number: u32,
        /// Section address.
        section: String,
        /// Offset of `data` in the decoded part.
        offset: u64,
        /// Decoded bytes.
        data: Vec<u8>,
        /// Last call for the part.
        complete: bool,
    },
    /// [`DataHandler::on_search`].
    Search(SearchResult),
    /// [`DataHandler::on_idle`].
    Idle(IdleEvent),
    /// [`DataHandler::on_mailbox`].
    Mailbox(ListEntry),
    /// [`DataHandler::on_command_response`].
    CommandResponse {
        /// Command text.
        command: String,
        /// Response line.
        line: String,
    },
}

/// Records every callback. Clones share one event list, so a clone kept by
/// the caller sees what the engine's copy received.
#[derive(Debug, Default, Clone)]
pub struct CollectingHandler {
    events: Arc<Mutex<Vec<DataEvent>>>,
}

impl CollectingHandler {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<DataEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes all events, leaving the collector empty.
    pub fn take(&self) -> Vec<DataEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Decoded bytes of `section`, joined across calls.
    #[must_use]
    pub fn part_bytes(&self, section: &str) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DataEvent::Part { section: s, data, .. } if s == section => Some(data),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn push(&self, event: DataEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl DataHandler for CollectingHandler {
    fn on_envelope(&mut self, header: &MessageHeader) {
        self.push(DataEvent::Envelope(header.clone()));
    }

    fn on_part(&mut self, part: &PartData<'_>) {
        self.push(DataEvent::Part {
            number: part.number,
            section: part.section.to_string(),
            offset: part.offset,
            data: part.data.to_vec(),
            complete: part.complete,
        });
    }

    fn on_search(&mut self, result: &SearchResult) {
        self.push(DataEvent::Search(result.clone()));
    }

    fn on_idle(&mut self, event: &IdleEvent) {
        self.push(DataEvent::Idle(event.clone()));
    }

    fn on_mailbox(&mut self, entry: &ListEntry) {
        self.push(DataEvent::Mailbox(entry.clone()));
    }

    fn on_command_response(&mut self, command: &str, line: &str) {
        self.push(DataEvent::CommandResponse {
            command: command.to_string(),
            line: line.to_string(),
        });
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
    fn test_noop_handler() {
        let mut handler = NoopHandler;
        handler.on_idle(&IdleEvent::Exists(3));
        handler.on_command_response("NOOP", "A1 OK");
    }

    #[test]
    fn test_collecting_handler_shares_events() {
        let collector = CollectingHandler::new();
        let mut engine_copy = collector.clone();

        engine_copy.on_idle(&IdleEvent::Exists(50));
        engine_copy.on_search(&SearchResult {
            numbers: vec![3, 2],
            total: 2,
            uid: false,
        });

        let events = collector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], DataEvent::Idle(IdleEvent::Exists(50)));

        assert_eq!(collector.take().len(), 2);
        assert!(collector.events().is_empty());
    }

    #[test]
    fn test_part_bytes_joined() {
        let mut collector = CollectingHandler::new();
        for (offset, chunk, complete) in [(0, &b"hel"[..], false), (3, &b"lo"[..], true)] {
            collector.on_part(&PartData {
                number: 1,
                section: "1",
                mime: "text/plain",
                filename: None,
                path: None,
                offset,
                data: chunk,
                size: 5,
                complete,
                progress: 0,
            });
        }
        assert_eq!(collector.part_bytes("1"), b"hello");
        assert!(collector.part_bytes("2").is_empty());
    }

    #[test]
    fn test_header_lookup() {
        let header = MessageHeader {
            number: 1,
            uid: None,
            headers: vec![("Subject".into(), "Hi".into())],
        };
        assert_eq!(header.get("subject"), Some("Hi"));
        assert_eq!(header.get("From"), None);
    }
}
