//! MIME media types.

use std::fmt;

use crate::error::{Error, Result};

/// Multipart container kinds used when composing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultipartKind {
    /// `multipart/mixed`: body plus attachments.
    Mixed,
    /// `multipart/alternative`: text and html renditions.
    Alternative,
    /// `multipart/related`: html plus inline resources.
    Related,
    /// `multipart/parallel`: parts meant to be shown together.
    Parallel,
}

impl MultipartKind {
    /// Subtype name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Alternative => "alternative",
            Self::Related => "related",
            Self::Parallel => "parallel",
        }
    }

    /// Parses a multipart subtype.
    #[must_use]
    pub fn parse(subtype: &str) -> Option<Self> {
        match subtype.to_ascii_lowercase().as_str() {
            "mixed" => Some(Self::Mixed),
            "alternative" => Some(Self::Alternative),
            "related" => Some(Self::Related),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

impl fmt::Display for MultipartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "multipart/{}", self.as_str())
    }
}

/// Media type with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type, lowercase.
    pub main_type: String,
    /// Subtype, lowercase.
    pub sub_type: String,
    /// Parameters in header order, keys lowercase.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a content type without parameters.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// `text/plain; charset=utf-8`.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// `text/html; charset=utf-8`.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Multipart container with a boundary.
    #[must_use]
    pub fn multipart(kind: MultipartKind, boundary: impl Into<String>) -> Self {
        Self::new("multipart", kind.as_str()).with_parameter("boundary", boundary)
    }

    /// Sets a parameter, replacing an existing one with the same key.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into().to_ascii_lowercase();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((key, value)),
        }
        self
    }

    /// Looks up a parameter by key, case-insensitively.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The `charset` parameter.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// The `boundary` parameter.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Returns true for `multipart/*`.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Returns true for `text/*`.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Parses `type/subtype; key=value; ...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (main, sub) = essence
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;
        let (main, sub) = (main.trim(), sub.trim());
        if main.is_empty() || sub.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }
        let mut ct = Self::new(main.to_ascii_lowercase(), sub.to_ascii_lowercase());
        for param in parts {
            if let Some((key, value)) = param.trim().split_once('=') {
                ct = ct.with_parameter(key.trim(), value.trim().trim_matches('"'));
            }
        }
        Ok(ct)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        for (key, value) in &self.parameters {
            if value.is_empty() || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Guesses a media type from a file name's extension.
///
/// Unknown extensions map to `application/octet-stream`.
#[must_use]
pub fn infer_from_filename(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "ics" => "text/calendar",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
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
    fn parse_with_params() {
        let ct = ContentType::parse("Text/Plain; Charset=\"ISO-8859-1\"; format=flowed").unwrap();
        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.charset(), Some("ISO-8859-1"));
        assert_eq!(ct.parameter("FORMAT"), Some("flowed"));
        assert!(ct.is_text());
    }

    #[test]
    fn parse_rejects_missing_subtype() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn display_keeps_order_and_quotes() {
        let ct = ContentType::multipart(MultipartKind::Mixed, "=_abc")
            .with_parameter("type", "text/html");
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"=_abc\"; type=\"text/html\"");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("=_abc"));
    }

    #[test]
    fn parameter_replaced_not_duplicated() {
        let ct = ContentType::text_plain().with_parameter("charset", "us-ascii");
        assert_eq!(ct.parameters.len(), 1);
        assert_eq!(ct.to_string(), "text/plain; charset=us-ascii");
    }

    #[test]
    fn multipart_kind_names() {
        assert_eq!(MultipartKind::parse("RELATED"), Some(MultipartKind::Related));
        assert_eq!(MultipartKind::parse("report"), None);
        assert_eq!(MultipartKind::Parallel.to_string(), "multipart/parallel");
    }

    #[test]
    fn infers_from_extension() {
        assert_eq!(infer_from_filename("photo.JPG"), "image/jpeg");
        assert_eq!(infer_from_filename("report.pdf"), "application/pdf");
        assert_eq!(infer_from_filename("README"), "application/octet-stream");
    }
}
