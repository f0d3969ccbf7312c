//! Single-pass allow-list HTML cleaner.
//!
//! The input is tokenized once, left to right. Allowed elements are
//! re-serialized in a canonical form (lower-case names, double-quoted and
//! escaped attribute values, every open element closed), so cleaning the
//! output again yields the same string.

use std::sync::LazyLock;

use regex::Regex;

use super::SanitizeOptions;
use super::normalize::{canonical, decode_entities, escape_html, strip_comments, strip_invisible};

/// Elements removed together with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &[
    "applet", "frameset", "iframe", "math", "noembed", "noframes", "noscript", "object",
    "script", "select", "style", "svg", "template", "textarea", "title", "xmp",
];

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "wbr"];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "cite"];

const MAX_URL_LENGTH: usize = 2048;

/// Script-capable protocol names left in text are defused by replacing the
/// colon.
static PROTOCOL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(javascript|vbscript|livescript)(\s*):|(data)(\s*):(\s*text/html)")
        .expect("static pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Output {
    /// Escaped HTML with allowed markup kept
    Html,
    /// Text content only, unescaped, no angle brackets
    Text,
}

pub(super) fn clean(input: &str, options: &SanitizeOptions, output: Output) -> String {
    let capped = cap_bytes(input, options.max_input_bytes);
    let visible = strip_invisible(capped);
    let source = strip_comments(&visible);

    let cleaner = Cleaner {
        input: &source,
        lower: source.to_ascii_lowercase(),
        pos: 0,
        out: String::with_capacity(source.len().min(options.max_length * 2)),
        stack: Vec::new(),
        budget: options.max_length,
        options,
        output,
    };
    let cleaned = cleaner.run();

    match PROTOCOL_IN_TEXT.is_match(&cleaned) {
        true => PROTOCOL_IN_TEXT
            .replace_all(&cleaned, "${1}${2}${3}${4}-${5}")
            .into_owned(),
        false => cleaned,
    }
}

fn cap_bytes(input: &str, max: usize) -> &str {
    if input.len() <= max {
        return input;
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

/// Whether `value` may be used as a link or resource URL.
pub(super) fn is_safe_url(value: &str, allow_data_image: bool) -> bool {
    let canon: String = canonical(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    let Some(delim) = canon.find([':', '/', '?', '#']) else {
        return true;
    };
    if !canon[delim..].starts_with(':') {
        return true;
    }
    match &canon[..delim] {
        "http" | "https" | "mailto" => true,
        "data" => {
            allow_data_image
                && canon.starts_with("data:image/")
                && !canon.starts_with("data:image/svg")
        }
        _ => false,
    }
}

struct Tag<'a> {
    name: String,
    attributes: Vec<(String, Option<&'a str>)>,
}

struct Cleaner<'a> {
    input: &'a str,
    /// ASCII-lowercased copy of `input`, same byte offsets
    lower: String,
    pos: usize,
    out: String,
    stack: Vec<String>,
    /// Remaining characters of text content
    budget: usize,
    options: &'a SanitizeOptions,
    output: Output,
}

impl<'a> Cleaner<'a> {
    fn run(mut self) -> String {
        while self.pos < self.input.len() && self.budget > 0 {
            match self.input[self.pos..].find('<') {
                Some(0) => self.markup(),
                Some(len) => self.text(len),
                None => self.text(self.input.len() - self.pos),
            }
        }
        while let Some(name) = self.stack.pop() {
            self.close(&name);
        }
        self.out
    }

    fn text(&mut self, len: usize) {
        let input = self.input;
        let raw = &input[self.pos..self.pos + len];
        self.pos += len;
        let decoded = decode_entities(raw);
        self.emit_text(&decoded);
    }

    fn emit_text(&mut self, text: &str) {
        let mut taken = 0;
        let mut end = text.len();
        for (i, _) in text.char_indices() {
            if taken == self.budget {
                end = i;
                break;
            }
            taken += 1;
        }
        self.budget -= taken;
        let text = &text[..end];

        match self.output {
            Output::Html => escape_html(text, &mut self.out),
            Output::Text => self
                .out
                .extend(text.chars().filter(|c| !matches!(c, '<' | '>'))),
        }
    }

    fn markup(&mut self) {
        let input = self.input;
        let bytes = input.as_bytes();
        match bytes.get(self.pos + 1) {
            Some(b'!') | Some(b'?') => self.skip_past_gt(self.pos + 2),
            Some(b'/') if bytes.get(self.pos + 2).is_some_and(u8::is_ascii_alphabetic) => {
                self.end_tag()
            }
            Some(b) if b.is_ascii_alphabetic() => self.start_tag(),
            _ => {
                self.pos += 1;
                self.emit_text("<");
            }
        }
    }

    fn skip_past_gt(&mut self, from: usize) {
        self.pos = match self.input[from..].find('>') {
            Some(i) => from + i + 1,
            None => self.input.len(),
        };
    }

    fn read_name(&self, from: usize) -> (String, usize) {
        let len = self.input[from..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':')
            .count();
        (self.input[from..from + len].to_ascii_lowercase(), from + len)
    }

    fn end_tag(&mut self) {
        let (name, after) = self.read_name(self.pos + 2);
        self.skip_past_gt(after);

        if let Some(index) = self.stack.iter().rposition(|open| *open == name) {
            while self.stack.len() > index {
                if let Some(open) = self.stack.pop() {
                    self.close(&open);
                }
            }
        }
    }

    fn start_tag(&mut self) {
        let Some(tag) = self.parse_tag() else {
            // Unterminated tag: nothing after it can be trusted
            self.pos = self.input.len();
            return;
        };

        if DROP_WITH_CONTENT.contains(&tag.name.as_str()) {
            self.skip_element(&tag.name);
            return;
        }
        if self.output == Output::Text
            || !self.options.allowed_tags.contains(&tag.name)
            || self.stack.len() >= self.options.max_depth
        {
            return;
        }

        self.out.push('<');
        self.out.push_str(&tag.name);
        self.write_attributes(&tag);
        self.out.push('>');

        if !VOID_ELEMENTS.contains(&tag.name.as_str()) {
            self.stack.push(tag.name);
        }
    }

    fn parse_tag(&mut self) -> Option<Tag<'a>> {
        let input = self.input;
        let bytes = input.as_bytes();
        let (name, mut i) = self.read_name(self.pos + 1);
        let mut attributes = Vec::new();

        loop {
            while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
                i += 1;
            }
            match bytes.get(i) {
                None => return None,
                Some(b'>') => {
                    self.pos = i + 1;
                    return Some(Tag { name, attributes });
                }
                Some(_) => {}
            }

            let start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            if i == start {
                // Stray '='
                i += 1;
                continue;
            }
            let attr_name = input[start..i].to_ascii_lowercase();

            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = None;
            if bytes.get(i) == Some(&b'=') {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                match *bytes.get(i)? {
                    quote @ (b'"' | b'\'') => {
                        let end = input[i + 1..].find(quote as char)?;
                        value = Some(&input[i + 1..i + 1 + end]);
                        i += end + 2;
                    }
                    _ => {
                        let start = i;
                        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>'
                        {
                            i += 1;
                        }
                        value = Some(&input[start..i]);
                    }
                }
            }
            attributes.push((attr_name, value));
        }
    }

    /// Skip to just past the matching close tag, or to the end of input.
    fn skip_element(&mut self, name: &str) {
        let needle = format!("</{name}");
        let mut from = self.pos;
        while let Some(found) = self.lower[from..].find(&needle) {
            let after = from + found + needle.len();
            let boundary = self.lower.as_bytes().get(after);
            if boundary.is_none_or(|b| !b.is_ascii_alphanumeric() && *b != b'-') {
                self.skip_past_gt(after);
                return;
            }
            from = after;
        }
        self.pos = self.input.len();
    }

    fn write_attributes(&mut self, tag: &Tag<'_>) {
        let options = self.options;
        let Some(allowed) = options.allowed_attributes.get(&tag.name) else {
            return;
        };
        let mut written: Vec<&str> = Vec::new();

        for (name, raw) in &tag.attributes {
            if name.starts_with("on") || !allowed.contains(name) || written.contains(&name.as_str())
            {
                continue;
            }
            written.push(name.as_str());

            let decoded = decode_entities(raw.unwrap_or_default());
            let value = if URL_ATTRIBUTES.contains(&name.as_str()) {
                let url: String = decoded
                    .trim()
                    .chars()
                    .filter(|c| !c.is_control())
                    .collect();
                let allow_data_image = tag.name == "img" && name == "src";
                if url.len() <= MAX_URL_LENGTH && is_safe_url(&url, allow_data_image) {
                    url
                } else {
                    "#".to_string()
                }
            } else {
                decoded.into_owned()
            };

            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            escape_html(&value, &mut self.out);
            self.out.push('"');
        }
    }

    fn close(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(input: &str) -> String {
        clean(input, &SanitizeOptions::default(), Output::Html)
    }

    #[test]
    fn test_is_safe_url() {
        assert!(is_safe_url("https://example.com/a?b=c", false));
        assert!(is_safe_url("/relative/path", false));
        assert!(is_safe_url("page#frag:x", false));
        assert!(is_safe_url("mailto:a@example.com", false));
        assert!(!is_safe_url("javascript:alert(1)", false));
        assert!(!is_safe_url(" JaVaScRiPt:alert(1)", false));
        assert!(!is_safe_url("java\tscript:alert(1)", false));
        assert!(!is_safe_url("&#106;avascript&colon;alert(1)", false));
        assert!(!is_safe_url("javascript%3Aalert(1)", false));
        assert!(!is_safe_url("vbscript:msgbox", false));
        assert!(!is_safe_url("data:text/html;base64,PHNjcmlwdD4=", true));
        assert!(!is_safe_url("data:image/png;base64,AAAA", false));
        assert!(is_safe_url("data:image/png;base64,AAAA", true));
        assert!(!is_safe_url("data:image/svg+xml;base64,AAAA", true));
    }

    #[test]
    fn test_unclosed_elements_are_closed() {
        assert_eq!(html("<p><b>bold"), "<p><b>bold</b></p>");
        assert_eq!(html("<p><b>x</p>y"), "<p><b>x</b></p>y");
    }

    #[test]
    fn test_stray_close_tags_dropped() {
        assert_eq!(html("a</b></script>b"), "ab");
    }

    #[test]
    fn test_unterminated_tag_drops_rest() {
        assert_eq!(html("ok<img src=x onerror=alert(1)"), "ok");
    }

    #[test]
    fn test_bare_angle_bracket_is_text() {
        assert_eq!(html("1 < 2 > 0"), "1 &lt; 2 &gt; 0");
    }

    #[test]
    fn test_duplicate_attributes_first_wins() {
        assert_eq!(
            html(r#"<a href="/one" href="javascript:x">l</a>"#),
            r#"<a href="/one">l</a>"#
        );
    }

    #[test]
    fn test_text_output_mode() {
        let out = clean(
            "<b>Hi</b> &lt;there&gt;<script>x</script>",
            &SanitizeOptions::default(),
            Output::Text,
        );
        assert_eq!(out, "Hi there");
    }

    #[test]
    fn test_protocols_in_text_defused() {
        assert_eq!(html("see javascript:alert(1)"), "see javascript-alert(1)");
        assert_eq!(html("java<x>script:1"), "javascript-1");
    }
}
