//! RFC 3676 `format=flowed` text.

/// Recommended maximum line length for flowed text.
pub const DEFAULT_WIDTH: usize = 78;

const SIGNATURE: &str = "-- ";

fn split_quote(line: &str) -> (usize, &str) {
    let depth = line.bytes().take_while(|&b| b == b'>').count();
    (depth, &line[depth..])
}

/// Formats `text` as flowed lines no longer than `width` where possible.
///
/// Hard line breaks are kept as CRLF; long lines are broken after a space
/// which stays at the end of the line as the soft-break marker. Quote
/// depth is carried onto continuation lines and space-stuffing is applied.
#[must_use]
pub fn format_flowed(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    for (i, raw) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("\r\n");
        }
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line == SIGNATURE {
            out.push_str(line);
            continue;
        }
        let (depth, content) = split_quote(line);
        let prefix = ">".repeat(depth);
        let content = content.trim_end_matches(' ');
        let stuff = if depth > 0 {
            !content.is_empty()
        } else {
            content.starts_with(' ') || content.starts_with("From ") || content.starts_with('>')
        };
        let lead = if stuff { " " } else { "" };
        let budget = width.saturating_sub(prefix.len() + lead.len()).max(1);

        let mut rest = content;
        loop {
            out.push_str(&prefix);
            out.push_str(lead);
            if rest.len() <= budget {
                out.push_str(rest);
                break;
            }
            let cut = soft_break(rest, budget);
            match cut {
                Some(at) => {
                    out.push_str(&rest[..=at]);
                    out.push_str("\r\n");
                    rest = &rest[at + 1..];
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        }
    }
    out
}

/// Drops the spaces before every hard line break, keeping the `-- `
/// signature separator intact.
///
/// Used when flowed text is quoted-printable encoded and the encoder places
/// the soft breaks itself; a kept trailing space would mark the hard break
/// as soft.
#[must_use]
pub fn trim_hard_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, raw) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let (line, cr) = raw.strip_suffix('\r').map_or((raw, ""), |l| (l, "\r"));
        if line == SIGNATURE {
            out.push_str(line);
        } else {
            out.push_str(line.trim_end_matches(' '));
        }
        out.push_str(cr);
    }
    out
}

/// Index of the space to break after, preferring the last one that fits.
fn soft_break(line: &str, budget: usize) -> Option<usize> {
    let fits = line
        .char_indices()
        .take_while(|(i, _)| *i < budget)
        .filter(|(i, c)| *c == ' ' && *i + 1 < line.len())
        .map(|(i, _)| i)
        .last();
    fits.or_else(|| {
        line.char_indices()
            .find(|(i, c)| *c == ' ' && *i + 1 < line.len())
            .map(|(i, _)| i)
    })
}

/// Rejoins flowed lines into paragraphs.
///
/// With `delsp` the soft-break space is removed as well.
#[must_use]
pub fn unflow(text: &str, delsp: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open = false;
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let (depth, mut content) = split_quote(line);
        if let Some(stripped) = content.strip_prefix(' ') {
            content = stripped;
        }
        if !open {
            out.push_str(&">".repeat(depth));
            if depth > 0 && !content.is_empty() {
                out.push(' ');
            }
        }
        let soft = line != SIGNATURE && content.ends_with(' ');
        if soft && delsp {
            content = &content[..content.len() - 1];
        }
        out.push_str(content);
        open = soft;
        if !soft {
            out.push('\n');
        }
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
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
    fn short_text_untouched() {
        assert_eq!(format_flowed("Hello\nWorld", DEFAULT_WIDTH), "Hello\r\nWorld");
    }

    #[test]
    fn long_paragraph_soft_breaks() {
        let text = "lorem ipsum ".repeat(20);
        let flowed = format_flowed(text.trim_end(), 40);
        let lines: Vec<&str> = flowed.split("\r\n").collect();
        assert!(lines.len() > 1);
        for line in &lines[..lines.len() - 1] {
            assert!(line.ends_with(' '));
            assert!(line.len() <= 40);
        }
        assert!(!lines[lines.len() - 1].ends_with(' '));
        assert_eq!(unflow(&flowed, false), text.trim_end());
    }

    #[test]
    fn space_stuffing() {
        assert_eq!(format_flowed("From me", 78), " From me");
        assert_eq!(format_flowed(" indented", 78), "  indented");
    }

    #[test]
    fn quote_prefix_carried() {
        let text = format!(">>{}", "word ".repeat(20).trim_end());
        let flowed = format_flowed(&text, 30);
        for line in flowed.split("\r\n") {
            assert!(line.starts_with(">> "));
        }
    }

    #[test]
    fn trailing_spaces_on_hard_lines_removed() {
        assert_eq!(format_flowed("end   \nnext", 78), "end\r\nnext");
    }

    #[test]
    fn signature_separator_kept() {
        assert_eq!(format_flowed("bye\n-- \nme", 78), "bye\r\n-- \r\nme");
    }

    #[test]
    fn hard_break_trim_keeps_line_endings() {
        assert_eq!(trim_hard_breaks("end  \r\nnext \nlast "), "end\r\nnext\nlast");
        assert_eq!(trim_hard_breaks("bye\n-- \nme"), "bye\n-- \nme");
        assert_eq!(trim_hard_breaks("a long line stays"), "a long line stays");
    }

    #[test]
    fn unflow_with_delsp() {
        assert_eq!(unflow("abc \r\ndef", true), "abcdef");
        assert_eq!(unflow("abc \r\ndef", false), "abc def");
    }
}
