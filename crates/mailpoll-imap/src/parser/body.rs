//! `BODYSTRUCTURE` parsing into an arena of parts.
//!
//! Parts live in one vector, parent first. Relationships are indices, and
//! every part keeps a flat list of tagged fields so single-part and
//! multipart bodies can expose different field sets through one query.
//!
//! Section addresses follow RFC 3501: the children of the top-level
//! multipart are `1`, `2`, ...; children of a nested multipart at `2` are
//! `2.1`, `2.2`, ...; a non-multipart message body is part `1`.
//! `message/rfc822` parts are kept as leaves and fetched whole.

use mailpoll_mime::{Charset, TransferEncoding, encoded_word};

use super::tokenizer::{Token, Tokenizer};
use crate::Result;

/// Kind of a captured body field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Content-Type parameter (key/value pairs).
    Parameter,
    /// Content-ID.
    ContentId,
    /// Content-Description.
    Description,
    /// Content-Transfer-Encoding.
    Encoding,
    /// Size in octets as transferred.
    Size,
    /// Line count of text and message parts.
    Lines,
    /// Content-MD5.
    Md5,
    /// Disposition type (`inline`, `attachment`).
    Disposition,
    /// Disposition parameter (key/value pairs).
    DispositionParameter,
    /// Content-Language.
    Language,
    /// Content-Location.
    Location,
}

impl FieldKind {
    /// Returns true for kinds stored as alternating key/value entries.
    #[must_use]
    pub const fn is_paired(self) -> bool {
        matches!(self, Self::Parameter | Self::DispositionParameter)
    }
}

/// One captured field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// What the value describes.
    pub kind: FieldKind,
    /// Field text; parameter keys are lowercased.
    pub value: String,
}

/// A part in the arena.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyPart {
    /// Dotted section address; empty for a top-level multipart.
    pub section: String,
    /// Nesting depth, 0 for the top level.
    pub depth: usize,
    /// Index of the enclosing multipart.
    pub parent: Option<usize>,
    /// Indices of contained parts.
    pub children: Vec<usize>,
    /// Lowercased media type; `multipart` for containers.
    pub media_type: String,
    /// Lowercased subtype.
    pub subtype: String,
    /// Captured fields in wire order.
    pub fields: Vec<Field>,
}

impl BodyPart {
    /// `type/subtype`.
    #[must_use]
    pub fn mime(&self) -> String {
        format!("{}/{}", self.media_type, self.subtype)
    }

    /// Returns true for multipart containers.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.media_type == "multipart"
    }

    /// Returns true for `text/*`.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.media_type == "text"
    }

    /// Returns true for `message/rfc822` and friends.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.media_type == "message"
    }

    /// Queries a field by kind and occurrence.
    ///
    /// For paired kinds `index` counts pairs and `key` picks the key or the
    /// value of that pair; for other kinds `key` is ignored.
    #[must_use]
    pub fn field(&self, kind: FieldKind, index: usize, key: bool) -> Option<&str> {
        let mut values = self
            .fields
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.value.as_str());
        if kind.is_paired() {
            values.nth(index * 2 + usize::from(!key))
        } else {
            values.nth(index)
        }
    }

    /// Looks up a parameter of a paired kind by case-insensitive name.
    #[must_use]
    pub fn param(&self, kind: FieldKind, name: &str) -> Option<&str> {
        (0..)
            .map_while(|i| Some((self.field(kind, i, true)?, self.field(kind, i, false))))
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v)
    }

    /// Declared transfer encoding.
    #[must_use]
    pub fn encoding(&self) -> TransferEncoding {
        self.field(FieldKind::Encoding, 0, false)
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Declared charset; UTF-8 when absent.
    #[must_use]
    pub fn charset(&self) -> Charset {
        self.param(FieldKind::Parameter, "charset")
            .map_or(Charset::Utf8, Charset::parse)
    }

    /// Size in octets as transferred.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.field(FieldKind::Size, 0, false)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Estimated size once decoded.
    #[must_use]
    pub fn decoded_size(&self) -> u64 {
        if let Some(size) = self
            .param(FieldKind::DispositionParameter, "size")
            .and_then(|s| s.parse().ok())
        {
            return size;
        }
        match self.encoding() {
            TransferEncoding::Base64 => self.size() / 4 * 3,
            _ => self.size(),
        }
    }

    /// Disposition type, lowercased.
    #[must_use]
    pub fn disposition(&self) -> Option<&str> {
        self.field(FieldKind::Disposition, 0, false)
    }

    /// Filename from the disposition, falling back to the `name` parameter.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.param(FieldKind::DispositionParameter, "filename")
            .or_else(|| self.param(FieldKind::Parameter, "name"))
            .filter(|s| !s.is_empty())
    }

    /// Content-ID without angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        self.field(FieldKind::ContentId, 0, false)
            .map(|id| id.trim_start_matches('<').trim_end_matches('>'))
    }

    /// Returns true for media types counted as attachments.
    #[must_use]
    pub fn is_attachment_type(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "image" | "audio" | "video" | "application" | "message"
        )
    }
}

/// Parsed `BODYSTRUCTURE` or `BODY`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyStructure {
    parts: Vec<BodyPart>,
}

impl BodyStructure {
    /// Parses the contents of a `BODYSTRUCTURE (...)` group, outer
    /// parentheses excluded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) if the structure is
    /// malformed.
    pub fn parse(inner: &str) -> Result<Self> {
        let mut body = Self::default();
        body.parse_group(inner, None, String::new(), 0)?;
        Ok(body)
    }

    /// All parts, parents before children.
    #[must_use]
    pub fn parts(&self) -> &[BodyPart] {
        &self.parts
    }

    /// Part at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&BodyPart> {
        self.parts.get(index)
    }

    /// Number of parts, containers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if nothing was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Non-multipart parts in wire order.
    pub fn leaves(&self) -> impl Iterator<Item = &BodyPart> {
        self.parts.iter().filter(|p| !p.is_multipart())
    }

    /// Assigned section addresses in parse order.
    #[must_use]
    pub fn sections(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|p| p.section.as_str())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Part addressed by `section`.
    #[must_use]
    pub fn find(&self, section: &str) -> Option<&BodyPart> {
        self.parts.iter().find(|p| p.section == section)
    }

    /// Number of image, audio, video, application and message parts.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.leaves().filter(|p| p.is_attachment_type()).count()
    }

    fn parse_group(
        &mut self,
        inner: &str,
        parent: Option<usize>,
        section: String,
        depth: usize,
    ) -> Result<usize> {
        let index = self.parts.len();
        self.parts.push(BodyPart {
            section,
            depth,
            parent,
            ..BodyPart::default()
        });
        if let Some(p) = parent {
            self.parts[p].children.push(index);
        }

        let mut tok = Tokenizer::new(inner);
        match tok.expect("body type")? {
            Token::List(first) => self.parse_multipart(index, first, &mut tok)?,
            first => self.parse_single(index, &first, &mut tok)?,
        }
        Ok(index)
    }

    fn parse_multipart<'a>(
        &mut self,
        index: usize,
        first: &'a str,
        tok: &mut Tokenizer<'a>,
    ) -> Result<()> {
        self.parts[index].media_type = "multipart".to_string();
        let prefix = self.parts[index].section.clone();
        let depth = self.parts[index].depth;

        let mut next = Some(first);
        let mut numeral = 1usize;
        while let Some(child) = next.take() {
            let section = if prefix.is_empty() {
                numeral.to_string()
            } else {
                format!("{prefix}.{numeral}")
            };
            self.parse_group(child, Some(index), section, depth + 1)?;
            numeral += 1;
            match tok.next_token()? {
                Some(Token::List(more)) => next = Some(more),
                Some(subtype) => self.parts[index].subtype = subtype.to_text().to_ascii_lowercase(),
                None => {}
            }
        }

        // body-ext-mpart: parameters, disposition, language, location
        let mut fields = Vec::new();
        if let Some(params) = tok.next_token()? {
            push_pairs(&mut fields, FieldKind::Parameter, &params)?;
        }
        parse_extension_tail(&mut fields, tok)?;
        self.parts[index].fields = fields;
        Ok(())
    }

    fn parse_single(
        &mut self,
        index: usize,
        first: &Token<'_>,
        tok: &mut Tokenizer<'_>,
    ) -> Result<()> {
        if self.parts[index].section.is_empty() {
            self.parts[index].section = "1".to_string();
        }
        let media_type = first.to_text().to_ascii_lowercase();
        let subtype = tok.expect("subtype")?.to_text().to_ascii_lowercase();

        let mut fields = Vec::new();
        let params = tok.expect("body parameters")?;
        push_pairs(&mut fields, FieldKind::Parameter, &params)?;
        push_single(&mut fields, FieldKind::ContentId, &tok.expect("body id")?);
        let description = tok.expect("body description")?;
        fields.push(Field {
            kind: FieldKind::Description,
            value: encoded_word::decode(&description.to_text()),
        });
        let encoding = tok.expect("body encoding")?;
        fields.push(Field {
            kind: FieldKind::Encoding,
            value: encoding.to_text().to_ascii_lowercase(),
        });
        push_single(&mut fields, FieldKind::Size, &tok.expect("body size")?);

        if media_type == "text" {
            if let Some(lines) = tok.next_token()? {
                push_single(&mut fields, FieldKind::Lines, &lines);
            }
        } else if media_type == "message" && subtype == "rfc822" {
            // envelope and nested body are fetched with the part itself
            let _envelope = tok.next_token()?;
            let _body = tok.next_token()?;
            if let Some(lines) = tok.next_token()? {
                push_single(&mut fields, FieldKind::Lines, &lines);
            }
        }

        // body-ext-1part: md5, disposition, language, location
        if let Some(md5) = tok.next_token()? {
            push_single(&mut fields, FieldKind::Md5, &md5);
        }
        parse_extension_tail(&mut fields, tok)?;

        let part = &mut self.parts[index];
        part.media_type = media_type;
        part.subtype = subtype;
        part.fields = fields;
        Ok(())
    }
}

fn parse_extension_tail(fields: &mut Vec<Field>, tok: &mut Tokenizer<'_>) -> Result<()> {
    if let Some(Token::List(disposition)) = tok.next_token()? {
        let mut inner = Tokenizer::new(disposition);
        if let Some(kind) = inner.next_token()? {
            fields.push(Field {
                kind: FieldKind::Disposition,
                value: kind.to_text().to_ascii_lowercase(),
            });
        }
        if let Some(params) = inner.next_token()? {
            push_pairs(fields, FieldKind::DispositionParameter, &params)?;
        }
    }
    match tok.next_token()? {
        Some(Token::List(languages)) => {
            for lang in Tokenizer::new(languages) {
                push_single(fields, FieldKind::Language, &lang?);
            }
        }
        Some(lang) => push_single(fields, FieldKind::Language, &lang),
        None => return Ok(()),
    }
    if let Some(location) = tok.next_token()? {
        push_single(fields, FieldKind::Location, &location);
    }
    Ok(())
}

fn push_single(fields: &mut Vec<Field>, kind: FieldKind, token: &Token<'_>) {
    if let Some(value) = token.as_str() {
        fields.push(Field {
            kind,
            value: value.to_string(),
        });
    }
}

fn push_pairs(fields: &mut Vec<Field>, kind: FieldKind, token: &Token<'_>) -> Result<()> {
    let Some(list) = token.list() else {
        return Ok(());
    };
    let mut tok = Tokenizer::new(list);
    while let Some(key) = tok.next_token()? {
        let value = tok.next_token()?.map(|v| v.to_text()).unwrap_or_default();
        fields.push(Field {
            kind,
            value: key.to_text().to_ascii_lowercase(),
        });
        fields.push(Field {
            kind,
            value: encoded_word::decode(&value),
        });
    }
    Ok(())
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

    const NESTED: &str = concat!(
        r#"("text" "plain" ("charset" "utf-8") NIL NIL "7bit" 12 1 NIL NIL NIL NIL)"#,
        r#"(("text" "html" ("charset" "utf-8") NIL NIL "quoted-printable" 40 2 NIL NIL NIL NIL)"#,
        r#"("image" "png" ("name" "logo.png") "<logo@x>" NIL "base64" 400 NIL "#,
        r#"("inline" ("filename" "logo.png")) NIL NIL) "related" ("boundary" "b2") NIL NIL NIL)"#,
        r#" "mixed" ("boundary" "b1") NIL NIL NIL"#
    );

    mod section_tests {
        use super::*;

        #[test]
        fn nested_sections_in_parse_order() {
            let body = BodyStructure::parse(NESTED).unwrap();
            assert_eq!(body.sections(), vec!["1", "2", "2.1", "2.2"]);
            assert_eq!(body.len(), 5);
            assert_eq!(body.get(0).unwrap().subtype, "mixed");
            assert_eq!(body.find("2").unwrap().subtype, "related");
        }

        #[test]
        fn arena_links_parents_and_children() {
            let body = BodyStructure::parse(NESTED).unwrap();
            let related = body.find("2").unwrap();
            assert_eq!(related.parent, Some(0));
            assert_eq!(related.depth, 1);
            let kids: Vec<&str> = related
                .children
                .iter()
                .map(|&i| body.get(i).unwrap().section.as_str())
                .collect();
            assert_eq!(kids, vec!["2.1", "2.2"]);
            assert_eq!(body.find("2.2").unwrap().depth, 2);
        }

        #[test]
        fn single_part_message_is_section_one() {
            let body = BodyStructure::parse(r#""TEXT" "PLAIN" ("CHARSET" "us-ascii") NIL NIL "7BIT" 3028 92"#)
                .unwrap();
            assert_eq!(body.sections(), vec!["1"]);
            let part = body.find("1").unwrap();
            assert_eq!(part.mime(), "text/plain");
            assert_eq!(part.charset(), Charset::UsAscii);
            assert_eq!(part.field(FieldKind::Lines, 0, false), Some("92"));
        }
    }

    mod field_tests {
        use super::*;

        #[test]
        fn leaf_fields() {
            let body = BodyStructure::parse(NESTED).unwrap();
            let image = body.find("2.2").unwrap();
            assert_eq!(image.mime(), "image/png");
            assert_eq!(image.encoding(), TransferEncoding::Base64);
            assert_eq!(image.size(), 400);
            assert_eq!(image.decoded_size(), 300);
            assert_eq!(image.content_id(), Some("logo@x"));
            assert_eq!(image.disposition(), Some("inline"));
            assert_eq!(image.filename(), Some("logo.png"));
            assert_eq!(image.field(FieldKind::DispositionParameter, 0, true), Some("filename"));
            assert_eq!(image.field(FieldKind::DispositionParameter, 0, false), Some("logo.png"));
            assert_eq!(image.field(FieldKind::DispositionParameter, 1, true), None);
        }

        #[test]
        fn multipart_parameters() {
            let body = BodyStructure::parse(NESTED).unwrap();
            let root = body.get(0).unwrap();
            assert!(root.is_multipart());
            assert_eq!(root.param(FieldKind::Parameter, "BOUNDARY"), Some("b1"));
        }

        #[test]
        fn attachment_count_by_media_type() {
            let body = BodyStructure::parse(NESTED).unwrap();
            assert_eq!(body.attachment_count(), 1);
            assert_eq!(body.leaves().count(), 3);
        }

        #[test]
        fn encoded_filename_is_decoded() {
            let body = BodyStructure::parse(concat!(
                r#""APPLICATION" "PDF" ("NAME" "=?UTF-8?B?w6l0w6kucGRm?=") NIL NIL "BASE64" 4000 NIL "#,
                r#"("ATTACHMENT" ("FILENAME" "=?UTF-8?B?w6l0w6kucGRm?=" "SIZE" "2950")) NIL NIL"#
            ))
            .unwrap();
            let part = body.find("1").unwrap();
            assert_eq!(part.filename(), Some("été.pdf"));
            assert_eq!(part.disposition(), Some("attachment"));
            assert_eq!(part.decoded_size(), 2950);
        }

        #[test]
        fn message_part_is_a_leaf() {
            let body = BodyStructure::parse(concat!(
                r#"("TEXT" "PLAIN" NIL NIL NIL "7BIT" 10 1)"#,
                r#"("MESSAGE" "RFC822" NIL NIL NIL "7BIT" 500 (NIL "inner" NIL NIL NIL NIL NIL NIL NIL NIL) "#,
                r#"("TEXT" "PLAIN" NIL NIL NIL "7BIT" 20 2) 12) "MIXED""#
            ))
            .unwrap();
            assert_eq!(body.sections(), vec!["1", "2"]);
            let message = body.find("2").unwrap();
            assert!(message.is_message());
            assert_eq!(message.field(FieldKind::Lines, 0, false), Some("12"));
            assert_eq!(body.attachment_count(), 1);
        }
    }

    #[test]
    fn malformed_structure_fails() {
        assert!(BodyStructure::parse(r#"("text" "plain""#).is_err());
        assert!(BodyStructure::parse("").is_err());
    }
}
