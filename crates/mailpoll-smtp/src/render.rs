//! Header and boundary text for outbound messages.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset};
use mailpoll_mime::{MultipartKind, TransferEncoding, encoded_word};

use crate::message::{Attachment, AttachmentKind, OutboundMessage, TextBody};

/// RFC 5322 date format used for the `Date` header.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Renders the message header block, ending with `MIME-Version`.
///
/// `Bcc` recipients are left out; they only appear in the envelope.
#[must_use]
pub fn message_headers(msg: &OutboundMessage, date: &DateTime<FixedOffset>) -> String {
    let mut h = String::with_capacity(512);

    if let Some(p) = msg.priority {
        let _ = write!(h, "X-Priority:{}\r\n", p.level());
        let _ = write!(h, "X-MSMail-Priority:{}\r\n", p.word());
        let _ = write!(h, "Importance:{}\r\n", p.word());
    }

    let author = &msg.author;
    let agent = &msg.sender;
    if !author.email.is_empty() && !agent.email.is_empty() && author.email != agent.email {
        let _ = write!(h, "From:{}\r\n", author.header_value());
        let _ = write!(h, "Sender:{}\r\n", agent.header_value());
    } else if !author.email.is_empty() {
        let _ = write!(h, "From:{}\r\n", author.header_value());
    } else if !agent.email.is_empty() {
        let _ = write!(h, "From:{}\r\n", agent.header_value());
    }

    if !msg.to.is_empty() {
        let to: Vec<String> = msg.to.iter().map(crate::types::Mailbox::header_value).collect();
        let _ = write!(h, "To: {}\r\n", to.join(","));
    }
    if !msg.cc.is_empty() {
        let cc: Vec<String> = msg.cc.iter().map(|e| format!("<{e}>")).collect();
        let _ = write!(h, "Cc: {}\r\n", cc.join(","));
    }

    let _ = write!(h, "Subject: {}\r\n", encoded_word::encode(&msg.subject));

    for line in &msg.headers {
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            let _ = write!(h, "{line}\r\n");
        }
    }

    let _ = write!(h, "Date: {}\r\n", date.format(DATE_FORMAT));

    if let Some(v) = &msg.reply_to {
        let _ = write!(h, "Reply-To: <{}>\r\n", bare(v));
    }
    if let Some(v) = &msg.return_path {
        let _ = write!(h, "Return-Path: <{}>\r\n", bare(v));
    }
    if let Some(v) = &msg.in_reply_to {
        let _ = write!(h, "In-Reply-To: {v}\r\n");
    }
    if let Some(v) = &msg.references {
        let _ = write!(h, "References: {v}\r\n");
    }
    if let Some(v) = &msg.comments {
        let _ = write!(h, "Comments: {}\r\n", encoded_word::encode(v));
    }
    if let Some(v) = &msg.keywords {
        let _ = write!(h, "Keywords: {}\r\n", encoded_word::encode(v));
    }
    if let Some(v) = &msg.message_id {
        let _ = write!(h, "Message-ID: <{}>\r\n", bare(v));
    }

    h.push_str("MIME-Version: 1.0\r\n");
    h
}

fn bare(v: &str) -> &str {
    v.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Delimiter line opening a part: `\r\n--boundary\r\n`.
#[must_use]
pub fn delimiter(boundary: &str) -> String {
    format!("\r\n--{boundary}\r\n")
}

/// Closing delimiter: `\r\n--boundary--`, CRLF-terminated unless it ends
/// the whole message.
#[must_use]
pub fn close_delimiter(boundary: &str, last: bool) -> String {
    if last {
        format!("\r\n--{boundary}--")
    } else {
        format!("\r\n--{boundary}--\r\n")
    }
}

/// Multipart container header, nested in `parent` when given.
#[must_use]
pub fn multipart_header(kind: MultipartKind, boundary: &str, parent: Option<&str>) -> String {
    let mut h = parent.map(delimiter).unwrap_or_default();
    let _ = write!(h, "Content-Type: {kind}; boundary=\"{boundary}\"\r\n");
    h
}

/// Header of a text or html part.
#[must_use]
pub fn text_part_header(body: &TextBody, parent: Option<&str>) -> String {
    let mut h = parent.map(delimiter).unwrap_or_default();
    let _ = write!(
        h,
        "Content-Type: text/{}; charset=\"{}\"",
        body.subtype, body.charset
    );
    if body.flowed {
        h.push_str("; format=\"flowed\"; delsp=\"no\"");
    }
    let _ = write!(
        h,
        "\r\nContent-Transfer-Encoding: {}\r\n\r\n",
        body.effective_encoding()
    );
    h
}

/// Header of an attachment, inline image or parallel part.
///
/// `size` is the source length; it is left out when unknown.
#[must_use]
pub fn attachment_header(att: &Attachment, boundary: &str, size: Option<u64>) -> String {
    let mut h = delimiter(boundary);
    let _ = write!(h, "Content-Type: {}; name=\"{}\"\r\n", att.mime, att.name);
    let disposition = if att.kind == AttachmentKind::Inline {
        "inline"
    } else {
        "attachment"
    };
    let _ = write!(
        h,
        "Content-Disposition: {disposition}; filename=\"{}\"",
        att.filename
    );
    if let Some(size) = size {
        let _ = write!(h, "; size={size}");
    }
    h.push_str("\r\n");
    if att.kind == AttachmentKind::Inline {
        let _ = write!(h, "Content-Location: {}\r\n", att.name);
        if let Some(cid) = &att.content_id {
            let _ = write!(h, "Content-ID: <{cid}>\r\n");
        }
    }
    let _ = write!(
        h,
        "Content-Transfer-Encoding: {}\r\n\r\n",
        TransferEncoding::Base64
    );
    h
}

/// Header of an embedded `message/rfc822` part.
#[must_use]
pub fn embedded_header(name: &str, filename: &str, boundary: &str) -> String {
    let mut h = delimiter(boundary);
    let _ = write!(
        h,
        "Content-Type: message/rfc822; Name=\"{name}\"\r\nContent-Disposition: attachment; filename=\"{filename}\"\r\n\r\n"
    );
    h
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
    use crate::message::Priority;
    use chrono::TimeZone;

    fn date() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 9, 4, 1)
            .unwrap()
    }

    mod header_tests {
        use super::*;

        #[test]
        fn minimal_headers() {
            let msg = OutboundMessage::new()
                .from("Me", "me@example.com")
                .to("You", "you@example.com")
                .subject("Hello");
            let h = message_headers(&msg, &date());
            assert_eq!(
                h,
                "From:\"Me\" <me@example.com>\r\n\
                 To: \"You\" <you@example.com>\r\n\
                 Subject: Hello\r\n\
                 Date: Tue, 05 Mar 2024 09:04:01 +0700\r\n\
                 MIME-Version: 1.0\r\n"
            );
        }

        #[test]
        fn sender_written_when_different() {
            let msg = OutboundMessage::new()
                .from("Me", "me@example.com")
                .sender("Bot", "bot@example.com");
            let h = message_headers(&msg, &date());
            assert!(h.contains("From:\"Me\" <me@example.com>\r\nSender:\"Bot\" <bot@example.com>\r\n"));
        }

        #[test]
        fn bcc_never_in_headers() {
            let msg = OutboundMessage::new()
                .to("", "a@example.com")
                .cc("b@example.com")
                .cc("c@example.com")
                .bcc("hidden@example.com");
            let h = message_headers(&msg, &date());
            assert!(h.contains("To: <a@example.com>\r\n"));
            assert!(h.contains("Cc: <b@example.com>,<c@example.com>\r\n"));
            assert!(!h.contains("hidden"));
        }

        #[test]
        fn optional_headers() {
            let mut msg = OutboundMessage::new()
                .priority(Priority::High)
                .header("X-Mailer: mailpoll\r\n");
            msg.reply_to = Some("reply@example.com".into());
            msg.message_id = Some("<id@example.com>".into());
            msg.in_reply_to = Some("<parent@example.com>".into());
            let h = message_headers(&msg, &date());
            assert!(h.starts_with("X-Priority:1\r\nX-MSMail-Priority:High\r\nImportance:High\r\n"));
            assert!(h.contains("X-Mailer: mailpoll\r\nDate:"));
            assert!(h.contains("Reply-To: <reply@example.com>\r\n"));
            assert!(h.contains("In-Reply-To: <parent@example.com>\r\n"));
            assert!(h.contains("Message-ID: <id@example.com>\r\n"));
            assert!(h.ends_with("MIME-Version: 1.0\r\n"));
        }

        #[test]
        fn non_ascii_subject_encoded() {
            let msg = OutboundMessage::new().subject("Caf\u{e9}");
            let h = message_headers(&msg, &date());
            assert!(h.contains("Subject: =?utf-8?B?Q2Fmw6k=?=\r\n"));
        }
    }

    mod part_tests {
        use super::*;
        use crate::message::TextBody;

        #[test]
        fn delimiters() {
            assert_eq!(delimiter("=_b"), "\r\n--=_b\r\n");
            assert_eq!(close_delimiter("=_b", true), "\r\n--=_b--");
            assert_eq!(close_delimiter("=_b", false), "\r\n--=_b--\r\n");
        }

        #[test]
        fn root_and_nested_multipart() {
            assert_eq!(
                multipart_header(MultipartKind::Mixed, "=_m", None),
                "Content-Type: multipart/mixed; boundary=\"=_m\"\r\n"
            );
            assert_eq!(
                multipart_header(MultipartKind::Alternative, "=_a", Some("=_m")),
                "\r\n--=_m\r\nContent-Type: multipart/alternative; boundary=\"=_a\"\r\n"
            );
        }

        #[test]
        fn flowed_text_part() {
            let body = TextBody::plain("hi").flowed(true);
            assert_eq!(
                text_part_header(&body, Some("=_a")),
                "\r\n--=_a\r\nContent-Type: text/plain; charset=\"utf-8\"; format=\"flowed\"; delsp=\"no\"\r\n\
                 Content-Transfer-Encoding: 7bit\r\n\r\n"
            );
        }

        #[test]
        fn non_ascii_text_part_is_qp() {
            let body = TextBody::html("<p>\u{e9}</p>");
            let h = text_part_header(&body, None);
            assert!(h.starts_with("Content-Type: text/html; charset=\"utf-8\"\r\n"));
            assert!(h.ends_with("Content-Transfer-Encoding: quoted-printable\r\n\r\n"));
        }

        #[test]
        fn inline_part_header() {
            let mut att = Attachment::from_static("logo.png", b"png").with_content_id("abc");
            att.kind = AttachmentKind::Inline;
            assert_eq!(
                attachment_header(&att, "=_r", Some(3)),
                "\r\n--=_r\r\nContent-Type: image/png; name=\"logo.png\"\r\n\
                 Content-Disposition: inline; filename=\"logo.png\"; size=3\r\n\
                 Content-Location: logo.png\r\nContent-ID: <abc>\r\n\
                 Content-Transfer-Encoding: base64\r\n\r\n"
            );
        }

        #[test]
        fn attachment_part_header() {
            let att = Attachment::from_static("a.txt", b"abc");
            let h = attachment_header(&att, "=_m", None);
            assert!(h.contains("Content-Disposition: attachment; filename=\"a.txt\"\r\n"));
            assert!(!h.contains("Content-ID"));
        }

        #[test]
        fn rfc822_part_header() {
            assert_eq!(
                embedded_header("msg.eml", "msg.eml", "=_m"),
                "\r\n--=_m\r\nContent-Type: message/rfc822; Name=\"msg.eml\"\r\n\
                 Content-Disposition: attachment; filename=\"msg.eml\"\r\n\r\n"
            );
        }
    }
}
