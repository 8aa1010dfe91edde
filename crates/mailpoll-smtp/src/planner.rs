//! Multipart planning.
//!
//! Looks at which kinds of content a message declares and decides, once per
//! send attempt, which containers wrap them:
//!
//! ```text
//! mixed                    attachments, parallel parts or embedded messages
//! ├── related              inline images referenced from html
//! │   ├── alternative      text and html
//! │   │   ├── text/plain
//! │   │   └── text/html
//! │   └── image/*
//! ├── parallel
//! ├── message/rfc822
//! └── attachments
//! ```
//!
//! The result is a [`Plan`] plus the flat [`Step`] script the send machine
//! walks.

use mailpoll_mime::MultipartKind;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::debug;

use crate::message::{AttachmentKind, OutboundMessage};

/// Leading characters of every generated boundary.
pub const BOUNDARY_PREFIX: &str = "=_";

/// Total boundary length, prefix included.
pub const BOUNDARY_LEN: usize = 14;

const CONTENT_ID_LEN: usize = 12;

/// Body layout chosen for the text and html parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    /// No body part; only attachments or embedded messages.
    None,
    /// One text part.
    Single {
        /// The part is the html body.
        html: bool,
    },
    /// Text and html in `multipart/alternative`.
    Alternative,
    /// Html plus inline images in `multipart/related`.
    Related {
        /// Text and html are nested in `multipart/alternative`.
        alternative: bool,
    },
}

/// One multipart container and its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Container kind.
    pub kind: MultipartKind,
    /// Boundary token.
    pub boundary: String,
}

/// Container nesting for one message, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Body layout.
    pub body: Body,
    /// Containers in nesting order: mixed, related, alternative, parallel.
    pub layers: Vec<Layer>,
}

impl Plan {
    /// Container kinds, outermost first.
    #[must_use]
    pub fn kinds(&self) -> Vec<MultipartKind> {
        self.layers.iter().map(|l| l.kind).collect()
    }

    /// Boundary of the `kind` container, if the plan has one.
    #[must_use]
    pub fn boundary(&self, kind: MultipartKind) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.kind == kind)
            .map(|l| l.boundary.as_str())
    }

    /// Returns true for a message sent without any container.
    #[must_use]
    pub fn is_single_part(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns true if everything sits inside `multipart/mixed`.
    #[must_use]
    pub fn is_mixed(&self) -> bool {
        self.boundary(MultipartKind::Mixed).is_some()
    }

    /// Flattens the plan into the send script.
    #[must_use]
    pub fn script(&self) -> Vec<Step> {
        let mixed = self.is_mixed();
        let mut steps = vec![Step::Headers];
        if mixed {
            steps.push(Step::Open(MultipartKind::Mixed));
        }
        let alternative = [
            Step::Open(MultipartKind::Alternative),
            Step::Text { html: false },
            Step::Text { html: true },
            Step::Close(MultipartKind::Alternative),
        ];
        match self.body {
            Body::None => {}
            Body::Single { html } => steps.push(Step::Text { html }),
            Body::Alternative => steps.extend(alternative),
            Body::Related { alternative: nested } => {
                steps.push(Step::Open(MultipartKind::Related));
                if nested {
                    steps.extend(alternative);
                } else {
                    steps.push(Step::Text { html: true });
                }
                steps.push(Step::Attachments(AttachmentKind::Inline));
                steps.push(Step::Close(MultipartKind::Related));
            }
        }
        if mixed {
            if self.boundary(MultipartKind::Parallel).is_some() {
                steps.push(Step::Open(MultipartKind::Parallel));
                steps.push(Step::Attachments(AttachmentKind::Parallel));
                steps.push(Step::Close(MultipartKind::Parallel));
            }
            steps.push(Step::Embedded);
            steps.push(Step::Attachments(AttachmentKind::Attachment));
            steps.push(Step::Close(MultipartKind::Mixed));
        }
        steps
    }
}

/// One entry of the send script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Message header block.
    Headers,
    /// Container header inside the current container.
    Open(MultipartKind),
    /// Text or html part.
    Text {
        /// Send the html body.
        html: bool,
    },
    /// Every attachment of a kind, one part after another.
    Attachments(AttachmentKind),
    /// Every embedded message, each recursing into its own script.
    Embedded,
    /// Closing boundary of a container.
    Close(MultipartKind),
}

/// Generates a boundary token: `=_` followed by random alphanumerics.
pub fn boundary<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut b = String::with_capacity(BOUNDARY_LEN);
    b.push_str(BOUNDARY_PREFIX);
    b.extend((BOUNDARY_PREFIX.len()..BOUNDARY_LEN).map(|_| char::from(rng.sample(Alphanumeric))));
    b
}

fn content_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CONTENT_ID_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Returns true if `html` refers to an inline part by `cid:` or by file name.
fn is_referenced(html: &str, filename: &str, cid: Option<&str>) -> bool {
    if let Some(cid) = cid
        && html.contains(&format!("cid:{cid}"))
    {
        return true;
    }
    !filename.is_empty()
        && (html.contains(&format!("\"{filename}\"")) || html.contains(&format!("'{filename}'")))
}

/// Prepares `message` for sending and returns its plan.
///
/// Inline images without an html body, or never referenced from it, are
/// demoted to regular attachments so no empty `related` container is
/// created. Referenced ones get a Content-ID and the html reference is
/// rewritten to `cid:`.
pub fn plan<R: Rng + ?Sized>(message: &mut OutboundMessage, rng: &mut R) -> Plan {
    let has_text = !message.text.is_empty();
    let has_html = !message.html.is_empty();

    for att in &mut message.attachments {
        if att.kind != AttachmentKind::Inline {
            continue;
        }
        if !has_html
            || !is_referenced(&message.html.content, &att.filename, att.content_id.as_deref())
        {
            debug!(file = %att.filename, "inline part not referenced from html, sending as attachment");
            att.kind = AttachmentKind::Attachment;
            continue;
        }
        let cid = att.content_id.get_or_insert_with(|| content_id(rng)).clone();
        for quote in ['"', '\''] {
            let from = format!("{quote}{}{quote}", att.filename);
            let to = format!("{quote}cid:{cid}{quote}");
            message.html.content = message.html.content.replace(&from, &to);
        }
    }

    let has_inline = message.count(AttachmentKind::Inline) > 0;
    let has_parallel = message.count(AttachmentKind::Parallel) > 0;
    let mixed = message.count(AttachmentKind::Attachment) > 0
        || has_parallel
        || !message.embedded.is_empty();

    let body = if has_inline {
        Body::Related {
            alternative: has_text,
        }
    } else if has_text && has_html {
        Body::Alternative
    } else if has_html {
        Body::Single { html: true }
    } else if has_text || !mixed {
        Body::Single { html: false }
    } else {
        Body::None
    };

    let mut kinds = Vec::with_capacity(4);
    if mixed {
        kinds.push(MultipartKind::Mixed);
    }
    if matches!(body, Body::Related { .. }) {
        kinds.push(MultipartKind::Related);
    }
    if matches!(body, Body::Alternative | Body::Related { alternative: true }) {
        kinds.push(MultipartKind::Alternative);
    }
    if has_parallel {
        kinds.push(MultipartKind::Parallel);
    }
    let layers = kinds
        .into_iter()
        .map(|kind| Layer {
            kind,
            boundary: boundary(rng),
        })
        .collect();

    let plan = Plan { body, layers };
    debug!(body = ?plan.body, layers = ?plan.kinds(), "planned message");
    plan
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
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn text_only_is_single_part() {
            let mut msg = OutboundMessage::new().text(TextBody::plain("hi"));
            let plan = plan(&mut msg, &mut rng());
            assert!(plan.is_single_part());
            assert_eq!(plan.body, Body::Single { html: false });
            assert_eq!(plan.script(), vec![Step::Headers, Step::Text { html: false }]);
        }

        #[test]
        fn empty_message_still_has_a_text_part() {
            let mut msg = OutboundMessage::new();
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(plan.body, Body::Single { html: false });
        }

        #[test]
        fn text_and_html_is_alternative() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .html(TextBody::html("<p>hi</p>"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(plan.kinds(), vec![MultipartKind::Alternative]);
            assert_eq!(
                plan.script(),
                vec![
                    Step::Headers,
                    Step::Open(MultipartKind::Alternative),
                    Step::Text { html: false },
                    Step::Text { html: true },
                    Step::Close(MultipartKind::Alternative),
                ]
            );
        }

        #[test]
        fn inline_image_wraps_alternative_in_related() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .html(TextBody::html("<img src=\"logo.png\">"))
                .inline(Attachment::from_static("logo.png", b"png"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(
                plan.kinds(),
                vec![MultipartKind::Related, MultipartKind::Alternative]
            );
            assert_eq!(plan.body, Body::Related { alternative: true });
            let cid = msg.attachments[0].content_id.clone().unwrap();
            assert_eq!(msg.html.content, format!("<img src=\"cid:{cid}\">"));
        }

        #[test]
        fn html_with_inline_without_text() {
            let mut msg = OutboundMessage::new()
                .html(TextBody::html("<img src=\"cid:logo\">"))
                .inline(Attachment::from_static("logo.png", b"png").with_content_id("logo"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(plan.kinds(), vec![MultipartKind::Related]);
            assert_eq!(
                plan.script(),
                vec![
                    Step::Headers,
                    Step::Open(MultipartKind::Related),
                    Step::Text { html: true },
                    Step::Attachments(AttachmentKind::Inline),
                    Step::Close(MultipartKind::Related),
                ]
            );
        }

        #[test]
        fn unreferenced_inline_is_demoted() {
            let mut msg = OutboundMessage::new()
                .html(TextBody::html("<p>no images</p>"))
                .inline(Attachment::from_static("logo.png", b"png"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(msg.attachments[0].kind, AttachmentKind::Attachment);
            assert_eq!(plan.kinds(), vec![MultipartKind::Mixed]);
            assert!(plan.boundary(MultipartKind::Related).is_none());
        }

        #[test]
        fn inline_without_html_is_demoted() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .inline(Attachment::from_static("logo.png", b"png"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(plan.kinds(), vec![MultipartKind::Mixed]);
            assert_eq!(plan.body, Body::Single { html: false });
        }

        #[test]
        fn attachment_adds_outer_mixed() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .html(TextBody::html("<p>hi</p>"))
                .attach(Attachment::from_static("a.txt", b"abc"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(
                plan.kinds(),
                vec![MultipartKind::Mixed, MultipartKind::Alternative]
            );
            let script = plan.script();
            assert_eq!(script[1], Step::Open(MultipartKind::Mixed));
            assert_eq!(*script.last().unwrap(), Step::Close(MultipartKind::Mixed));
        }

        #[test]
        fn parallel_nested_in_mixed() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .parallel(Attachment::from_static("a.txt", b"abc"));
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(
                plan.kinds(),
                vec![MultipartKind::Mixed, MultipartKind::Parallel]
            );
            assert!(plan.script().contains(&Step::Attachments(AttachmentKind::Parallel)));
        }

        #[test]
        fn embedded_only() {
            let child = OutboundMessage::new().text(TextBody::plain("inner"));
            let mut msg = OutboundMessage::new().embed(child, "msg.eml", "msg.eml");
            let plan = plan(&mut msg, &mut rng());
            assert_eq!(plan.body, Body::None);
            assert_eq!(
                plan.script(),
                vec![
                    Step::Headers,
                    Step::Open(MultipartKind::Mixed),
                    Step::Embedded,
                    Step::Attachments(AttachmentKind::Attachment),
                    Step::Close(MultipartKind::Mixed),
                ]
            );
        }
    }

    mod boundary_tests {
        use super::*;

        #[test]
        fn shape() {
            let b = boundary(&mut rng());
            assert_eq!(b.len(), BOUNDARY_LEN);
            assert!(b.starts_with(BOUNDARY_PREFIX));
            assert!(b[2..].chars().all(|c| c.is_ascii_alphanumeric()));
        }

        #[test]
        fn layers_get_distinct_boundaries() {
            let mut msg = OutboundMessage::new()
                .text(TextBody::plain("hi"))
                .html(TextBody::html("<p>hi</p>"))
                .attach(Attachment::from_static("a.txt", b"abc"));
            let plan = plan(&mut msg, &mut rng());
            assert_ne!(plan.layers[0].boundary, plan.layers[1].boundary);
        }

        #[test]
        fn same_seed_same_plan() {
            let build = || {
                OutboundMessage::new()
                    .text(TextBody::plain("hi"))
                    .attach(Attachment::from_static("a.txt", b"abc"))
            };
            let a = plan(&mut build(), &mut rng());
            let b = plan(&mut build(), &mut rng());
            assert_eq!(a, b);
        }
    }
}
