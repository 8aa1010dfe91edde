//! Streaming decode of one fetched body part.
//!
//! A [`PartDownload`] receives the raw literal of a `BODY[section]` in
//! whatever slices the transport delivers, undoes the transfer encoding,
//! converts text to UTF-8 and hands each decoded run to the data handler
//! and, when a download directory is set, to a file.

use mailpoll_core::{FileHandle, FileMode, FileStore, ProgressTracker};
use mailpoll_mime::{Charset, Decoder};
use tracing::{debug, warn};

use crate::handler::{DataHandler, PartData};
use crate::parser::BodyPart;

/// Download of a single part.
pub struct PartDownload {
    number: u32,
    section: String,
    mime: String,
    filename: Option<String>,
    path: Option<String>,
    file: Option<Box<dyn FileHandle>>,
    decoder: Decoder,
    charset: Option<Charset>,
    total: u64,
    received: u64,
    offset: u64,
    streaming: bool,
    progress: ProgressTracker,
}

impl std::fmt::Debug for PartDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartDownload")
            .field("number", &self.number)
            .field("section", &self.section)
            .field("received", &self.received)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl PartDownload {
    /// Prepares a download of `part` of message `number`.
    #[must_use]
    pub fn new(number: u32, part: &BodyPart) -> Self {
        let charset = part.is_text().then(|| part.charset()).filter(Charset::needs_transcoding);
        Self {
            number,
            section: part.section.clone(),
            mime: part.mime(),
            filename: part.filename().map(str::to_string),
            path: None,
            file: None,
            decoder: Decoder::new(part.encoding()),
            charset,
            total: part.size(),
            received: 0,
            offset: 0,
            streaming: false,
            progress: ProgressTracker::new(),
        }
    }

    /// Section address.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Download path, once a file is open.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Decoded bytes emitted so far.
    #[must_use]
    pub const fn decoded(&self) -> u64 {
        self.offset
    }

    /// Path of the part under `dir`: `<dir>/<number>/<name>`.
    #[must_use]
    pub fn file_path(&self, dir: &str) -> String {
        let name = self.filename.as_deref().map_or_else(
            || {
                let ext = match self.mime.as_str() {
                    "text/html" => "html",
                    "message/rfc822" => "eml",
                    m if m.starts_with("text/") => "txt",
                    _ => "bin",
                };
                format!("{}.{ext}", self.section.replace('.', "_"))
            },
            |f| f.replace(['/', '\\'], "_"),
        );
        format!("{}/{}/{name}", dir.trim_end_matches('/'), self.number)
    }

    /// Opens the download file, replacing any earlier copy.
    ///
    /// A file that cannot be opened only disables the file sink.
    pub fn open_file(&mut self, store: &mut dyn FileStore, dir: &str) {
        let path = self.file_path(dir);
        if let Err(e) = store.open(&path, FileMode::Remove) {
            debug!(%path, error = %e, "no earlier download to remove");
        }
        match store.open(&path, FileMode::Write) {
            Ok(Some(handle)) => {
                self.file = Some(handle);
                self.path = Some(path);
            }
            Ok(None) => warn!(%path, "file store returned no handle"),
            Err(e) => warn!(%path, error = %e, "cannot open download file"),
        }
    }

    /// Starts streaming a literal of `size` encoded bytes.
    pub fn begin(&mut self, size: u64) {
        self.total = size;
        self.received = 0;
        self.streaming = size > 0;
    }

    /// Returns true while literal bytes are still expected.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Encoded bytes still expected.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.received)
    }

    /// Feeds raw literal bytes. Returns a new progress percentage worth
    /// reporting.
    pub fn feed(&mut self, raw: &[u8], handler: Option<&mut (dyn DataHandler + '_)>) -> Option<u8> {
        self.received += raw.len() as u64;
        if self.received >= self.total {
            self.streaming = false;
        }
        let decoded = self.decoder.feed(raw);
        let percent = self.progress.update(self.received, self.total);
        self.emit(&decoded, false, handler);
        percent
    }

    /// Flushes the decoder and closes the file.
    pub fn finish(&mut self, handler: Option<&mut (dyn DataHandler + '_)>) {
        self.streaming = false;
        let tail = self.decoder.finish();
        self.emit(&tail, true, handler);
        self.file = None;
    }

    fn emit(&mut self, decoded: &[u8], complete: bool, handler: Option<&mut (dyn DataHandler + '_)>) {
        if decoded.is_empty() && !complete {
            return;
        }
        let data = match &self.charset {
            Some(charset) => charset.to_utf8(decoded),
            None => std::borrow::Cow::Borrowed(decoded),
        };
        if let Some(file) = self.file.as_mut()
            && !data.is_empty()
            && let Err(e) = file.write(&data)
        {
            warn!(path = ?self.path, error = %e, "download write failed, closing file");
            self.file = None;
        }
        if let Some(handler) = handler {
            handler.on_part(&PartData {
                number: self.number,
                section: &self.section,
                mime: &self.mime,
                filename: self.filename.as_deref(),
                path: self.path.as_deref(),
                offset: self.offset,
                data: &data,
                size: self.total,
                complete,
                progress: if complete {
                    100
                } else {
                    self.progress_percent()
                },
            });
        }
        self.offset += data.len() as u64;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn progress_percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.received.min(self.total) * 100 / self.total) as u8
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
    use crate::handler::{CollectingHandler, DataEvent};
    use crate::parser::BodyStructure;

    fn part(inner: &str) -> BodyPart {
        BodyStructure::parse(inner).unwrap().parts()[0].clone()
    }

    #[test]
    fn base64_split_anywhere() {
        let p = part(r#""APPLICATION" "PDF" ("NAME" "r.pdf") NIL NIL "BASE64" 8"#);
        let mut dl = PartDownload::new(4, &p);
        let mut handler = CollectingHandler::new();
        dl.begin(8);
        let _ = dl.feed(b"aGVs", Some(&mut handler));
        let _ = dl.feed(b"bG8=", Some(&mut handler));
        assert!(!dl.is_streaming());
        dl.finish(Some(&mut handler));

        assert_eq!(handler.part_bytes("1"), b"hello");
        let last = handler.events().pop().unwrap();
        assert!(matches!(last, DataEvent::Part { complete: true, .. }));
    }

    #[test]
    fn latin1_text_transcoded() {
        let p = part(r#""TEXT" "PLAIN" ("CHARSET" "ISO-8859-1") NIL NIL "8BIT" 4 1"#);
        let mut dl = PartDownload::new(1, &p);
        let mut handler = CollectingHandler::new();
        dl.begin(4);
        let _ = dl.feed(b"caf\xE9", Some(&mut handler));
        dl.finish(Some(&mut handler));
        assert_eq!(handler.part_bytes("1"), "café".as_bytes());
        assert_eq!(dl.decoded(), 5);
    }

    #[test]
    fn file_paths() {
        let p = part(r#""TEXT" "HTML" NIL NIL NIL "7BIT" 10 1"#);
        let dl = PartDownload::new(12, &p);
        assert_eq!(dl.file_path("/mail/"), "/mail/12/1.html");

        let p = part(r#""IMAGE" "PNG" ("NAME" "a/b.png") NIL NIL "BASE64" 10"#);
        let dl = PartDownload::new(3, &p);
        assert_eq!(dl.file_path("/d"), "/d/3/a_b.png");
    }

    #[test]
    fn progress_reported() {
        let p = part(r#""TEXT" "PLAIN" NIL NIL NIL "7BIT" 100 2"#);
        let mut dl = PartDownload::new(1, &p);
        dl.begin(100);
        assert_eq!(dl.feed(&[b'a'; 50], None), Some(50));
        assert_eq!(dl.feed(&[b'a'; 2], None), None);
        assert_eq!(dl.feed(&[b'a'; 48], None), Some(100));
        assert_eq!(dl.remaining(), 0);
    }
}
