//! Streaming send state machine.
//!
//! A [`SendMachine`] renders one planned message a bounded piece at a time:
//! each [`next`](SendMachine::next) call yields one header block, one
//! boundary or one encoded content line (at most 76 characters plus CRLF for
//! base64). Text, html and attachments all read through a
//! [`Cursor`](mailpoll_mime::Cursor), so buffers, constant data and files
//! behave the same.
//!
//! Embedded messages run their own script on a frame stack; the parent
//! resumes when the child's script ends.

use std::collections::VecDeque;

use chrono::{DateTime, FixedOffset};
use mailpoll_core::{FileMode, FileStore, ProgressTracker};
use mailpoll_mime::{ChunkEncoder, Cursor, MultipartKind, TransferEncoding, flowed};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{trace, warn};

use crate::message::{AttachmentKind, AttachmentSource, OutboundMessage};
use crate::planner::{self, Plan, Step};
use crate::render;

/// Characters per line when passing pre-encoded base64 through.
const PASSTHROUGH_LINE: usize = 76;

/// Progress and diagnostics raised while sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// An attachment part started.
    PartStarted {
        /// File name.
        name: String,
        /// Placement.
        kind: AttachmentKind,
        /// Source size in bytes.
        size: u64,
    },
    /// Attachment upload progress.
    Progress {
        /// File name.
        name: String,
        /// Percent sent.
        percent: u8,
    },
    /// An attachment was left out.
    Skipped {
        /// File name.
        name: String,
        /// Why it was skipped.
        reason: String,
    },
}

/// Rendering options fixed for one send attempt.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Double leading dots (SMTP `DATA`). Off for IMAP `APPEND`.
    pub dot_stuff: bool,
    /// Seed for boundaries and Content-IDs; equal seeds render equal bytes.
    pub seed: u64,
    /// Value of `Date` headers for messages without an explicit date.
    pub now: DateTime<FixedOffset>,
}

impl SendOptions {
    /// Options for SMTP `DATA` with a random seed and the current time.
    #[must_use]
    pub fn smtp() -> Self {
        Self {
            dot_stuff: true,
            seed: rand::random(),
            now: chrono::Local::now().fixed_offset(),
        }
    }

    /// Options for IMAP `APPEND`.
    #[must_use]
    pub fn append() -> Self {
        Self {
            dot_stuff: false,
            ..Self::smtp()
        }
    }
}

/// Source and encoder of the part being streamed.
struct PartCursor {
    cursor: Cursor,
    encoder: PartEncoder,
    name: String,
    progress: Option<ProgressTracker>,
}

enum PartEncoder {
    Chunk(ChunkEncoder),
    Passthrough,
}

impl PartCursor {
    fn next_chunk(&mut self, out: &mut Vec<u8>) -> bool {
        match &mut self.encoder {
            PartEncoder::Chunk(enc) => enc.next_chunk(&mut self.cursor, out),
            PartEncoder::Passthrough => passthrough_line(&mut self.cursor, out),
        }
    }
}

/// Copies up to 76 base64 characters, dropping existing line breaks.
fn passthrough_line(cursor: &mut Cursor, out: &mut Vec<u8>) -> bool {
    let mut n = 0;
    while n < PASSTHROUGH_LINE && cursor.available() {
        match cursor.read() {
            b'\r' | b'\n' => {}
            b => {
                out.push(b);
                n += 1;
            }
        }
    }
    if n > 0 {
        out.extend_from_slice(b"\r\n");
    }
    n > 0
}

struct Child {
    name: String,
    filename: String,
    frame: Frame,
}

/// One message being rendered: the root or an embedded child.
struct Frame {
    message: OutboundMessage,
    plan: Plan,
    script: Vec<Step>,
    pc: usize,
    open: Vec<MultipartKind>,
    root: bool,
    date: DateTime<FixedOffset>,
    next_attachment: usize,
    children: VecDeque<Child>,
    part: Option<PartCursor>,
}

enum Flow {
    Emitted,
    Again,
    Enter(Box<Frame>),
    Finished,
}

impl Frame {
    fn new(
        mut message: OutboundMessage,
        rng: &mut StdRng,
        now: DateTime<FixedOffset>,
        root: bool,
    ) -> Self {
        let plan = planner::plan(&mut message, rng);
        let script = plan.script();
        let children = std::mem::take(&mut message.embedded)
            .into_iter()
            .map(|e| Child {
                name: e.name,
                filename: e.filename,
                frame: Self::new(e.message, rng, now, false),
            })
            .collect();
        let date = message.date.unwrap_or(now);
        Self {
            message,
            plan,
            script,
            pc: 0,
            open: Vec::new(),
            root,
            date,
            next_attachment: 0,
            children,
            part: None,
        }
    }

    fn current_boundary(&self) -> Option<&str> {
        self.open.last().and_then(|k| self.plan.boundary(*k))
    }

    fn advance<'s>(
        &mut self,
        store: Option<&mut (dyn FileStore + 's)>,
        events: &mut Vec<SendEvent>,
        raw: &mut Vec<u8>,
    ) -> Flow {
        if let Some(part) = &mut self.part {
            if part.next_chunk(raw) {
                if let Some(tracker) = &mut part.progress
                    && let Some(percent) = tracker.update(part.cursor.position(), part.cursor.size())
                {
                    events.push(SendEvent::Progress {
                        name: part.name.clone(),
                        percent,
                    });
                }
                return Flow::Emitted;
            }
            self.part = None;
        }

        let Some(step) = self.script.get(self.pc).copied() else {
            return Flow::Finished;
        };
        match step {
            Step::Headers => {
                raw.extend_from_slice(render::message_headers(&self.message, &self.date).as_bytes());
                self.pc += 1;
                Flow::Emitted
            }
            Step::Open(kind) => {
                let boundary = self.plan.boundary(kind).unwrap_or_default();
                let header = render::multipart_header(kind, boundary, self.current_boundary());
                raw.extend_from_slice(header.as_bytes());
                self.open.push(kind);
                self.pc += 1;
                Flow::Emitted
            }
            Step::Close(kind) => {
                self.open.pop();
                let boundary = self.plan.boundary(kind).unwrap_or_default();
                let last = self.root && self.open.is_empty();
                raw.extend_from_slice(render::close_delimiter(boundary, last).as_bytes());
                self.pc += 1;
                Flow::Emitted
            }
            Step::Text { html } => {
                self.start_text(html, raw);
                self.pc += 1;
                Flow::Emitted
            }
            Step::Attachments(kind) => {
                if self.start_attachment(kind, store, events, raw) {
                    Flow::Emitted
                } else {
                    self.next_attachment = 0;
                    self.pc += 1;
                    Flow::Again
                }
            }
            Step::Embedded => {
                let Some(child) = self.children.pop_front() else {
                    self.pc += 1;
                    return Flow::Again;
                };
                let boundary = self.current_boundary().unwrap_or_default();
                raw.extend_from_slice(
                    render::embedded_header(&child.name, &child.filename, boundary).as_bytes(),
                );
                Flow::Enter(Box::new(child.frame))
            }
        }
    }

    fn start_text(&mut self, html: bool, raw: &mut Vec<u8>) {
        let body = if html {
            &self.message.html
        } else {
            &self.message.text
        };
        raw.extend_from_slice(render::text_part_header(body, self.current_boundary()).as_bytes());

        let encoding = body.effective_encoding();
        let qp = encoding == TransferEncoding::QuotedPrintable;
        let content = match (body.flowed, qp) {
            (true, false) => flowed::format_flowed(&body.content, flowed::DEFAULT_WIDTH),
            // the encoder places the soft breaks
            (true, true) => flowed::trim_hard_breaks(&body.content),
            (false, _) => body.content.clone(),
        };
        self.part = Some(PartCursor {
            cursor: Cursor::from_bytes(content.into_bytes()),
            encoder: PartEncoder::Chunk(ChunkEncoder::new(encoding, body.flowed)),
            name: body.subtype.clone(),
            progress: None,
        });
    }

    fn find_attachment(&self, kind: AttachmentKind) -> Option<usize> {
        let start = self.next_attachment;
        self.message
            .attachments
            .iter()
            .skip(start)
            .position(|a| a.kind == kind)
            .map(|p| p + start)
    }

    /// Opens the next attachment of `kind` and writes its header.
    ///
    /// Returns false once none is left. Unreadable and empty sources are
    /// skipped.
    fn start_attachment<'s>(
        &mut self,
        kind: AttachmentKind,
        mut store: Option<&mut (dyn FileStore + 's)>,
        events: &mut Vec<SendEvent>,
        raw: &mut Vec<u8>,
    ) -> bool {
        while let Some(idx) = self.find_attachment(kind) {
            self.next_attachment = idx + 1;
            let att = &self.message.attachments[idx];
            let cursor = match &att.source {
                AttachmentSource::Blob(data) => Cursor::from_bytes(data.clone()),
                AttachmentSource::Static(data) => Cursor::from_static(data),
                AttachmentSource::File(path) => {
                    match store.as_deref_mut().map(|s| s.open(path, FileMode::Read)) {
                        Some(Ok(Some(handle))) => Cursor::from_file(handle),
                        Some(Ok(None)) | None => {
                            warn!(path = %path, "attachment file unavailable, skipping");
                            events.push(SendEvent::Skipped {
                                name: att.filename.clone(),
                                reason: "file not found".to_string(),
                            });
                            continue;
                        }
                        Some(Err(e)) => {
                            warn!(path = %path, error = %e, "cannot open attachment, skipping");
                            events.push(SendEvent::Skipped {
                                name: att.filename.clone(),
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    }
                }
            };
            let size = cursor.size();
            if size == 0 {
                warn!(file = %att.filename, "empty attachment, skipping");
                events.push(SendEvent::Skipped {
                    name: att.filename.clone(),
                    reason: "empty".to_string(),
                });
                continue;
            }

            let Some(boundary) = self.current_boundary() else {
                return false;
            };
            let declared = (!att.pre_encoded).then_some(size);
            raw.extend_from_slice(render::attachment_header(att, boundary, declared).as_bytes());
            trace!(file = %att.filename, size, "attachment part");
            events.push(SendEvent::PartStarted {
                name: att.filename.clone(),
                kind,
                size,
            });
            let encoder = if att.pre_encoded {
                PartEncoder::Passthrough
            } else {
                PartEncoder::Chunk(ChunkEncoder::new(TransferEncoding::Base64, false))
            };
            self.part = Some(PartCursor {
                cursor,
                encoder,
                name: att.filename.clone(),
                progress: Some(ProgressTracker::new()),
            });
            return true;
        }
        false
    }
}

/// Doubles dots at line starts across chunk boundaries.
#[derive(Debug, Clone, Copy)]
struct DotStuffer {
    line_start: bool,
}

impl DotStuffer {
    const fn new() -> Self {
        Self { line_start: true }
    }

    fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            if self.line_start && b == b'.' {
                out.push(b'.');
            }
            out.push(b);
            self.line_start = b == b'\n';
        }
    }
}

/// Bounded-step renderer for one outbound message.
pub struct SendMachine {
    stack: Vec<Frame>,
    events: Vec<SendEvent>,
    stuffer: Option<DotStuffer>,
    written: u64,
}

impl std::fmt::Debug for SendMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendMachine")
            .field("depth", &self.stack.len())
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl SendMachine {
    /// Plans `message` and every embedded message, ready to stream.
    ///
    /// The message is cloned; the caller's copy is never modified, so a new
    /// machine always starts from zeroed indices.
    #[must_use]
    pub fn new(message: &OutboundMessage, options: SendOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let root = Frame::new(message.clone(), &mut rng, options.now, true);
        Self {
            stack: vec![root],
            events: Vec::new(),
            stuffer: options.dot_stuff.then(DotStuffer::new),
            written: 0,
        }
    }

    /// Plan of the root message.
    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.stack.first().map(|f| &f.plan)
    }

    /// Renders the next bounded piece into `out`.
    ///
    /// Returns false once the message is complete and nothing was written.
    pub fn next<'s>(
        &mut self,
        mut store: Option<&mut (dyn FileStore + 's)>,
        out: &mut Vec<u8>,
    ) -> bool {
        let mut raw = Vec::new();
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return false;
            };
            match frame.advance(store.as_deref_mut(), &mut self.events, &mut raw) {
                Flow::Emitted => break,
                Flow::Again => {}
                Flow::Enter(child) => {
                    self.stack.push(*child);
                    break;
                }
                Flow::Finished => {
                    self.stack.pop();
                }
            }
        }
        let before = out.len();
        match &mut self.stuffer {
            Some(stuffer) => stuffer.write(&raw, out),
            None => out.extend_from_slice(&raw),
        }
        self.written += (out.len() - before) as u64;
        true
    }

    /// Returns true once everything has been rendered.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Bytes rendered so far, dot-stuffing included.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Takes the events raised since the last call.
    pub fn take_events(&mut self) -> Vec<SendEvent> {
        std::mem::take(&mut self.events)
    }

    /// Renders the whole message at once.
    pub fn render_all<'s>(&mut self, mut store: Option<&mut (dyn FileStore + 's)>) -> Vec<u8> {
        let mut out = Vec::new();
        while self.next(store.as_deref_mut(), &mut out) {}
        out
    }

    /// Size of the rendered message without keeping it in memory.
    #[must_use]
    pub fn measure<'s>(
        message: &OutboundMessage,
        options: SendOptions,
        mut store: Option<&mut (dyn FileStore + 's)>,
    ) -> u64 {
        let mut machine = Self::new(message, options);
        let mut scratch = Vec::new();
        while machine.next(store.as_deref_mut(), &mut scratch) {
            scratch.clear();
        }
        machine.written
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
    use crate::message::{Attachment, TextBody};
    use chrono::TimeZone;

    fn options(dot_stuff: bool) -> SendOptions {
        SendOptions {
            dot_stuff,
            seed: 42,
            now: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .unwrap(),
        }
    }

    fn render(msg: &OutboundMessage) -> String {
        let mut m = SendMachine::new(msg, options(false));
        String::from_utf8(m.render_all(None)).unwrap()
    }

    fn base() -> OutboundMessage {
        OutboundMessage::new()
            .from("Me", "me@example.com")
            .to("You", "you@example.com")
            .subject("Test")
    }

    mod layout_tests {
        use super::*;

        #[test]
        fn single_part_text() {
            let out = render(&base().text(TextBody::plain("Hello\nWorld")));
            assert!(out.ends_with(
                "MIME-Version: 1.0\r\n\
                 Content-Type: text/plain; charset=\"utf-8\"\r\n\
                 Content-Transfer-Encoding: 7bit\r\n\r\n\
                 Hello\r\nWorld"
            ));
        }

        #[test]
        fn alternative_layout() {
            let msg = base()
                .text(TextBody::plain("plain"))
                .html(TextBody::html("<b>html</b>"));
            let m = SendMachine::new(&msg, options(false));
            let b = m.plan().unwrap().layers[0].boundary.clone();
            let out = render(&msg);
            let expected = format!(
                "MIME-Version: 1.0\r\n\
                 Content-Type: multipart/alternative; boundary=\"{b}\"\r\n\
                 \r\n--{b}\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\
                 Content-Transfer-Encoding: 7bit\r\n\r\nplain\
                 \r\n--{b}\r\nContent-Type: text/html; charset=\"utf-8\"\r\n\
                 Content-Transfer-Encoding: 7bit\r\n\r\n<b>html</b>\
                 \r\n--{b}--"
            );
            assert!(out.ends_with(&expected), "{out}");
        }

        #[test]
        fn related_wraps_alternative() {
            let msg = base()
                .text(TextBody::plain("plain"))
                .html(TextBody::html("<img src=\"logo.png\">"))
                .inline(Attachment::from_static("logo.png", b"PNGDATA"));
            let m = SendMachine::new(&msg, options(false));
            let plan = m.plan().unwrap().clone();
            let related = plan.boundary(MultipartKind::Related).unwrap();
            let alt = plan.boundary(MultipartKind::Alternative).unwrap();
            let out = render(&msg);
            let r_open = out.find(&format!("boundary=\"{related}\"")).unwrap();
            let a_open = out.find(&format!("--{related}\r\nContent-Type: multipart/alternative")).unwrap();
            let a_close = out.find(&format!("--{alt}--")).unwrap();
            let image = out.find("Content-Disposition: inline; filename=\"logo.png\"; size=7").unwrap();
            let r_close = out.find(&format!("--{related}--")).unwrap();
            assert!(r_open < a_open && a_open < a_close && a_close < image && image < r_close);
            assert!(out.contains("src=\"cid:"));
            assert!(out.contains("UE5HREFUQQ==\r\n"));
        }

        #[test]
        fn mixed_with_parallel() {
            let msg = base()
                .text(TextBody::plain("body"))
                .parallel(Attachment::from_static("p.txt", b"par"))
                .attach(Attachment::from_static("a.txt", b"att"));
            let out = render(&msg);
            let p = out.find("multipart/parallel").unwrap();
            let pa = out.find("filename=\"p.txt\"").unwrap();
            let a = out.find("filename=\"a.txt\"").unwrap();
            assert!(p < pa && pa < a);
            assert!(out.ends_with("--"));
        }

        #[test]
        fn embedded_message_recurses() {
            let child = OutboundMessage::new()
                .from("Inner", "inner@example.com")
                .to("", "x@example.com")
                .subject("Inner")
                .text(TextBody::plain("inner body"))
                .attach(Attachment::from_static("in.txt", b"in"));
            let msg = base()
                .text(TextBody::plain("outer body"))
                .embed(child, "fwd.eml", "fwd.eml");
            let out = render(&msg);
            let rfc = out.find("Content-Type: message/rfc822; Name=\"fwd.eml\"").unwrap();
            let inner_from = out.find("From:\"Inner\" <inner@example.com>").unwrap();
            let inner_att = out.find("filename=\"in.txt\"").unwrap();
            assert!(rfc < inner_from && inner_from < inner_att);
            assert_eq!(out.matches("Content-Type: multipart/mixed").count(), 2);
            // child closes with CRLF, the root does not
            assert!(!out.ends_with("\r\n"));
        }

        #[test]
        fn empty_and_missing_attachments_skipped() {
            let msg = base()
                .text(TextBody::plain("body"))
                .attach(Attachment::from_static("empty.txt", b""))
                .attach(Attachment::from_file("missing.bin"));
            let mut m = SendMachine::new(&msg, options(false));
            let out = String::from_utf8(m.render_all(None)).unwrap();
            assert!(!out.contains("empty.txt"));
            assert!(!out.contains("missing.bin"));
            let events = m.take_events();
            assert_eq!(events.len(), 2);
            assert!(matches!(&events[0], SendEvent::Skipped { name, .. } if name == "empty.txt"));
        }

        #[test]
        fn pre_encoded_passthrough() {
            let msg = base()
                .text(TextBody::plain("x"))
                .attach(Attachment::from_static("a.bin", b"QUJD\r\nREVG").pre_encoded());
            let out = render(&msg);
            assert!(out.contains("filename=\"a.bin\"\r\n"));
            assert!(out.contains("\r\n\r\nQUJDREVG\r\n"));
        }

        #[test]
        fn flowed_quoted_printable_hard_breaks() {
            let msg = base().text(TextBody::plain("caf\u{e9} end \nnext para").flowed(true));
            let out = render(&msg);
            assert!(out.contains("Content-Transfer-Encoding: quoted-printable"), "{out}");
            let body = out.split("\r\n\r\n").last().unwrap();
            assert_eq!(body, "caf=C3=A9 end\r\nnext para");
        }

        #[test]
        fn flowed_text() {
            let long = "word ".repeat(30);
            let msg = base().text(TextBody::plain(long.trim_end()).flowed(true));
            let out = render(&msg);
            assert!(out.contains("format=\"flowed\"; delsp=\"no\""));
            let body = out.split("\r\n\r\n").last().unwrap();
            assert!(body.lines().count() > 1);
        }
    }

    mod streaming_tests {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn base64_chunks_are_bounded() {
            let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
            let msg = base()
                .text(TextBody::plain("x"))
                .attach(Attachment::from_blob("d.bin", data));
            let mut m = SendMachine::new(&msg, options(false));
            let mut sizes = Vec::new();
            let mut buf = Vec::new();
            while m.next(None, &mut buf) {
                sizes.push(buf.len());
                buf.clear();
            }
            let header_max = sizes.iter().copied().max().unwrap();
            assert!(header_max < 400);
            assert!(m.is_done());
        }

        #[test]
        fn progress_events() {
            let data = vec![7u8; 57 * 40];
            let msg = base()
                .text(TextBody::plain("x"))
                .attach(Attachment::from_blob("big.bin", data));
            let mut m = SendMachine::new(&msg, options(false));
            let _ = m.render_all(None);
            let events = m.take_events();
            assert!(matches!(&events[0], SendEvent::PartStarted { size: 2280, .. }));
            let percents: Vec<u8> = events
                .iter()
                .filter_map(|e| match e {
                    SendEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect();
            assert_eq!(*percents.last().unwrap(), 100);
            assert!(percents.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn dot_stuffing_across_lines() {
            let msg = base().text(TextBody::plain(".start\nmid.dle\n..two"));
            let mut m = SendMachine::new(&msg, options(true));
            let out = String::from_utf8(m.render_all(None)).unwrap();
            assert!(out.ends_with("\r\n..start\r\nmid.dle\r\n...two"));
        }

        #[test]
        fn measure_matches_render() {
            let msg = base()
                .text(TextBody::plain("hello"))
                .attach(Attachment::from_static("a.txt", b"abcdef"));
            let size = SendMachine::measure(&msg, options(false), None);
            let out = SendMachine::new(&msg, options(false)).render_all(None);
            assert_eq!(size, out.len() as u64);
        }

        proptest! {
            #[test]
            fn measure_matches_any_blob(
                data in proptest::collection::vec(any::<u8>(), 0..2000),
                body in "[ -~\n]{0,200}",
            ) {
                let msg = base()
                    .text(TextBody::plain(body))
                    .attach(Attachment::from_blob("d.bin", data));
                let size = SendMachine::measure(&msg, options(true), None);
                let out = SendMachine::new(&msg, options(true)).render_all(None);
                prop_assert_eq!(size, out.len() as u64);
            }
        }

        #[test]
        fn caller_message_untouched() {
            let msg = base()
                .html(TextBody::html("<img src=\"i.png\">"))
                .inline(Attachment::from_static("i.png", b"i"));
            let _ = SendMachine::new(&msg, options(false)).render_all(None);
            assert!(msg.attachments[0].content_id.is_none());
            assert_eq!(msg.html.content, "<img src=\"i.png\">");
        }
    }
}
