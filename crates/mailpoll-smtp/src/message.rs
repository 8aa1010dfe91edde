//! Outbound message model.
//!
//! An [`OutboundMessage`] only declares content. Which multipart containers
//! wrap it is decided by the [planner](crate::planner) when a send starts,
//! so the same message can be sent again after parts are added or removed.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use mailpoll_mime::{TransferEncoding, infer_from_filename};

use crate::command::Notify;
use crate::types::Mailbox;

/// Message priority, written as `X-Priority`, `X-MSMail-Priority` and
/// `Importance` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// `X-Priority: 1`.
    High,
    /// `X-Priority: 3`.
    Normal,
    /// `X-Priority: 5`.
    Low,
}

impl Priority {
    /// Numeric `X-Priority` value.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 3,
            Self::Low => 5,
        }
    }

    /// Word used by `X-MSMail-Priority` and `Importance`.
    #[must_use]
    pub const fn word(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Normal => "Normal",
            Self::Low => "Low",
        }
    }
}

/// Plain text or html body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBody {
    /// Body content.
    pub content: String,
    /// `charset` parameter.
    pub charset: String,
    /// Media subtype: `plain` or `html`.
    pub subtype: String,
    /// Requested transfer encoding.
    pub transfer_encoding: TransferEncoding,
    /// Send as RFC 3676 `format=flowed`.
    pub flowed: bool,
}

impl TextBody {
    fn with_subtype(subtype: &str, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            charset: "utf-8".to_string(),
            subtype: subtype.to_string(),
            transfer_encoding: TransferEncoding::SevenBit,
            flowed: false,
        }
    }

    /// `text/plain` body.
    #[must_use]
    pub fn plain(content: impl Into<String>) -> Self {
        Self::with_subtype("plain", content)
    }

    /// `text/html` body.
    #[must_use]
    pub fn html(content: impl Into<String>) -> Self {
        Self::with_subtype("html", content)
    }

    /// Sets the transfer encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.transfer_encoding = encoding;
        self
    }

    /// Sets the charset.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Enables `format=flowed`.
    #[must_use]
    pub const fn flowed(mut self, flowed: bool) -> Self {
        self.flowed = flowed;
        self
    }

    /// Returns true when there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Encoding actually used on the wire.
    ///
    /// A 7bit request for content with bytes above 0x7F becomes
    /// quoted-printable so nothing is dropped.
    #[must_use]
    pub fn effective_encoding(&self) -> TransferEncoding {
        if self.transfer_encoding == TransferEncoding::SevenBit && !self.content.is_ascii() {
            TransferEncoding::QuotedPrintable
        } else {
            self.transfer_encoding
        }
    }
}

/// How an attachment is placed in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttachmentKind {
    /// Regular attachment in `multipart/mixed`.
    Attachment,
    /// Inline resource referenced from html via `cid:`.
    Inline,
    /// Part of a `multipart/parallel` group.
    Parallel,
}

/// Where attachment bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Owned in-memory data.
    Blob(Bytes),
    /// Constant data.
    Static(&'static [u8]),
    /// Path opened through the client's file store when the part is sent.
    File(String),
}

/// One attachment, inline image or parallel part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Display name, used for `Content-Location` and the `name` parameter.
    pub name: String,
    /// `filename` disposition parameter.
    pub filename: String,
    /// Media type, e.g. `image/png`.
    pub mime: String,
    /// Placement.
    pub kind: AttachmentKind,
    /// Data source.
    pub source: AttachmentSource,
    /// Explicit Content-ID for inline parts; one is generated otherwise.
    pub content_id: Option<String>,
    /// Source already holds base64 text and is passed through.
    pub pre_encoded: bool,
}

impl Attachment {
    fn new(filename: impl Into<String>, source: AttachmentSource) -> Self {
        let filename = filename.into();
        Self {
            name: filename.clone(),
            mime: infer_from_filename(&filename).to_string(),
            filename,
            kind: AttachmentKind::Attachment,
            source,
            content_id: None,
            pre_encoded: false,
        }
    }

    /// Attachment over owned data.
    #[must_use]
    pub fn from_blob(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(filename, AttachmentSource::Blob(data.into()))
    }

    /// Attachment over constant data.
    #[must_use]
    pub fn from_static(filename: impl Into<String>, data: &'static [u8]) -> Self {
        Self::new(filename, AttachmentSource::Static(data))
    }

    /// Attachment read from `path` via the file store.
    #[must_use]
    pub fn from_file(path: impl Into<String>) -> Self {
        let path = path.into();
        let filename = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self::new(filename, AttachmentSource::File(path))
    }

    /// Overrides the inferred media type.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    /// Overrides the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets an explicit Content-ID.
    #[must_use]
    pub fn with_content_id(mut self, cid: impl Into<String>) -> Self {
        self.content_id = Some(cid.into());
        self
    }

    /// Marks the source as already base64 encoded.
    #[must_use]
    pub const fn pre_encoded(mut self) -> Self {
        self.pre_encoded = true;
        self
    }

    /// Size of in-memory sources; files report zero until opened.
    #[must_use]
    pub fn declared_size(&self) -> usize {
        match &self.source {
            AttachmentSource::Blob(b) => b.len(),
            AttachmentSource::Static(s) => s.len(),
            AttachmentSource::File(_) => 0,
        }
    }
}

/// Whole message carried as a `message/rfc822` part.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedMessage {
    /// The carried message.
    pub message: OutboundMessage,
    /// `Name` parameter.
    pub name: String,
    /// `filename` disposition parameter.
    pub filename: String,
}

/// Outbound message declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Author, written as `From`.
    pub author: Mailbox,
    /// Transmitting agent; written as `Sender` when it differs from the author.
    pub sender: Mailbox,
    /// `To` recipients.
    pub to: Vec<Mailbox>,
    /// `Cc` recipients.
    pub cc: Vec<String>,
    /// Blind recipients, envelope only.
    pub bcc: Vec<String>,
    /// Subject, encoded as RFC 2047 words when non-ASCII.
    pub subject: String,
    /// Plain text body.
    pub text: TextBody,
    /// Html body.
    pub html: TextBody,
    /// Attachments, inline images and parallel parts in send order.
    pub attachments: Vec<Attachment>,
    /// Embedded messages.
    pub embedded: Vec<EmbeddedMessage>,
    /// Extra header lines, written verbatim.
    pub headers: Vec<String>,
    /// Optional priority headers.
    pub priority: Option<Priority>,
    /// `Reply-To` address.
    pub reply_to: Option<String>,
    /// `Return-Path` address.
    pub return_path: Option<String>,
    /// DSN conditions requested for `To` recipients.
    pub notify: Notify,
    /// `Message-ID` without angle brackets.
    pub message_id: Option<String>,
    /// `In-Reply-To` value.
    pub in_reply_to: Option<String>,
    /// `References` value.
    pub references: Option<String>,
    /// `Comments` value.
    pub comments: Option<String>,
    /// `Keywords` value.
    pub keywords: Option<String>,
    /// `Date`; the send time is used when unset.
    pub date: Option<DateTime<FixedOffset>>,
}

impl Default for OutboundMessage {
    fn default() -> Self {
        Self {
            author: Mailbox::default(),
            sender: Mailbox::default(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            text: TextBody::plain(""),
            html: TextBody::html(""),
            attachments: Vec::new(),
            embedded: Vec::new(),
            headers: Vec::new(),
            priority: None,
            reply_to: None,
            return_path: None,
            notify: Notify::NEVER,
            message_id: None,
            in_reply_to: None,
            references: None,
            comments: None,
            keywords: None,
            date: None,
        }
    }
}

impl OutboundMessage {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the author.
    #[must_use]
    pub fn from(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Mailbox::with_name(name, email);
        self
    }

    /// Sets the transmitting agent.
    #[must_use]
    pub fn sender(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.sender = Mailbox::with_name(name, email);
        self
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.to.push(Mailbox::with_name(name, email));
        self
    }

    /// Adds a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, email: impl Into<String>) -> Self {
        self.cc.push(email.into());
        self
    }

    /// Adds a blind recipient.
    #[must_use]
    pub fn bcc(mut self, email: impl Into<String>) -> Self {
        self.bcc.push(email.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text(mut self, body: TextBody) -> Self {
        self.text = body;
        self
    }

    /// Sets the html body.
    #[must_use]
    pub fn html(mut self, body: TextBody) -> Self {
        self.html = body;
        self
    }

    /// Adds a regular attachment.
    #[must_use]
    pub fn attach(mut self, mut attachment: Attachment) -> Self {
        attachment.kind = AttachmentKind::Attachment;
        self.attachments.push(attachment);
        self
    }

    /// Adds an inline image referenced from the html body.
    #[must_use]
    pub fn inline(mut self, mut attachment: Attachment) -> Self {
        attachment.kind = AttachmentKind::Inline;
        self.attachments.push(attachment);
        self
    }

    /// Adds a `multipart/parallel` part.
    #[must_use]
    pub fn parallel(mut self, mut attachment: Attachment) -> Self {
        attachment.kind = AttachmentKind::Parallel;
        self.attachments.push(attachment);
        self
    }

    /// Embeds a whole message as `message/rfc822`.
    #[must_use]
    pub fn embed(
        mut self,
        message: Self,
        name: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        self.embedded.push(EmbeddedMessage {
            message,
            name: name.into(),
            filename: filename.into(),
        });
        self
    }

    /// Adds a raw header line such as `X-Mailer: mailpoll`.
    #[must_use]
    pub fn header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Requests DSN notifications for `To` recipients.
    #[must_use]
    pub const fn notify(mut self, notify: Notify) -> Self {
        self.notify = notify;
        self
    }

    /// Envelope sender: the author, else the transmitting agent.
    #[must_use]
    pub fn envelope_sender(&self) -> &str {
        if self.author.email.is_empty() {
            &self.sender.email
        } else {
            &self.author.email
        }
    }

    /// Number of attachments of `kind`.
    #[must_use]
    pub fn count(&self, kind: AttachmentKind) -> usize {
        self.attachments.iter().filter(|a| a.kind == kind).count()
    }

    /// Removes every attachment of `kind`.
    pub fn clear_attachments(&mut self, kind: AttachmentKind) {
        self.attachments.retain(|a| a.kind != kind);
    }

    /// Total number of envelope recipients.
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
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
    fn builder_collects_parts() {
        let msg = OutboundMessage::new()
            .from("Me", "me@example.com")
            .to("You", "you@example.com")
            .cc("cc@example.com")
            .bcc("hidden@example.com")
            .subject("hi")
            .text(TextBody::plain("hello"))
            .attach(Attachment::from_static("a.txt", b"abc"))
            .inline(Attachment::from_static("logo.png", b"png"))
            .parallel(Attachment::from_static("b.txt", b"def"));
        assert_eq!(msg.recipient_count(), 3);
        assert_eq!(msg.count(AttachmentKind::Attachment), 1);
        assert_eq!(msg.count(AttachmentKind::Inline), 1);
        assert_eq!(msg.count(AttachmentKind::Parallel), 1);
        assert_eq!(msg.attachments[1].mime, "image/png");
        assert_eq!(msg.envelope_sender(), "me@example.com");
    }

    #[test]
    fn envelope_sender_falls_back_to_agent() {
        let msg = OutboundMessage::new().sender("Bot", "bot@example.com");
        assert_eq!(msg.envelope_sender(), "bot@example.com");
    }

    #[test]
    fn seven_bit_upgraded_for_non_ascii() {
        let body = TextBody::plain("caf\u{e9}");
        assert_eq!(body.effective_encoding(), TransferEncoding::QuotedPrintable);
        let body = TextBody::plain("cafe");
        assert_eq!(body.effective_encoding(), TransferEncoding::SevenBit);
        let body = TextBody::plain("caf\u{e9}").with_encoding(TransferEncoding::EightBit);
        assert_eq!(body.effective_encoding(), TransferEncoding::EightBit);
    }

    #[test]
    fn file_attachment_uses_basename() {
        let att = Attachment::from_file("/data/report.pdf");
        assert_eq!(att.filename, "report.pdf");
        assert_eq!(att.mime, "application/pdf");
        assert_eq!(att.source, AttachmentSource::File("/data/report.pdf".into()));
        assert_eq!(att.declared_size(), 0);
    }

    #[test]
    fn clear_by_kind() {
        let mut msg = OutboundMessage::new()
            .attach(Attachment::from_static("a.txt", b"a"))
            .inline(Attachment::from_static("b.png", b"b"));
        msg.clear_attachments(AttachmentKind::Inline);
        assert_eq!(msg.attachments.len(), 1);
    }

    #[test]
    fn priority_words() {
        assert_eq!(Priority::High.level(), 1);
        assert_eq!(Priority::Low.word(), "Low");
    }
}
