//! Cleaning and screening of user-authored content.
//!
//! [`ContentSanitizer::sanitize_html`] reduces markup to an allow-list and
//! re-serializes it canonically. [`ContentSanitizer::validate`] reports what
//! looked hostile in the raw input without changing it. Scalar fields go
//! through [`ContentSanitizer::sanitize_input`].

mod html;
mod input;
mod normalize;
mod rules;

use std::collections::{HashMap, HashSet};

pub use rules::{Severity, Validation, Violation};

use html::Output;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Email,
    Url,
}

#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    pub allowed_tags: HashSet<String>,
    /// Allowed attributes per tag. Event handlers are never allowed.
    pub allowed_attributes: HashMap<String, HashSet<String>>,
    /// Maximum characters of text content kept
    pub max_length: usize,
    /// Raw input beyond this many bytes is ignored
    pub max_input_bytes: usize,
    /// Elements nested deeper than this are unwrapped
    pub max_depth: usize,
}

impl SanitizeOptions {
    fn allowing(tags: &[&str], attributes: &[(&str, &[&str])]) -> Self {
        Self {
            allowed_tags: tags.iter().map(|t| t.to_string()).collect(),
            allowed_attributes: attributes
                .iter()
                .map(|(tag, attrs)| {
                    (
                        tag.to_string(),
                        attrs.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
            max_length: 50_000,
            max_input_bytes: 256 * 1024,
            max_depth: 32,
        }
    }

    /// Formatting, links and lists. Suitable for comments.
    pub fn basic() -> Self {
        Self {
            max_length: 5_000,
            ..Self::allowing(
                &[
                    "a", "b", "blockquote", "br", "code", "em", "i", "li", "ol", "p", "strong",
                    "ul",
                ],
                &[("a", &["href", "title"]), ("blockquote", &["cite"])],
            )
        }
    }

    /// No markup at all; text content only.
    pub fn strict() -> Self {
        Self::allowing(&[], &[])
    }
}

impl Default for SanitizeOptions {
    /// Rich formatting for posts, including images.
    fn default() -> Self {
        Self::allowing(
            &[
                "a", "abbr", "b", "blockquote", "br", "code", "del", "div", "em", "h1", "h2",
                "h3", "h4", "h5", "h6", "hr", "i", "img", "li", "ol", "p", "pre", "q", "s",
                "span", "strong", "sub", "sup", "u", "ul",
            ],
            &[
                ("a", &["href", "title"]),
                ("abbr", &["title"]),
                ("blockquote", &["cite"]),
                ("img", &["src", "alt", "title", "width", "height"]),
                ("q", &["cite"]),
            ],
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentSanitizer {
    options: SanitizeOptions,
}

impl ContentSanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SanitizeOptions {
        &self.options
    }

    /// Clean `input` with the sanitizer's own options.
    pub fn clean(&self, input: &str) -> String {
        self.sanitize_html(input, &self.options)
    }

    pub fn sanitize_html(&self, input: &str, options: &SanitizeOptions) -> String {
        html::clean(input, options, Output::Html)
    }

    pub fn validate(&self, input: &str) -> Validation {
        rules::validate(input, self.options.max_input_bytes)
    }

    /// `None` when the value cannot be made acceptable. Text is always
    /// accepted, possibly cleaned down to an empty string.
    pub fn sanitize_input(&self, value: &str, kind: InputKind) -> Option<String> {
        match kind {
            InputKind::Text => {
                let cleaned = html::clean(value, &SanitizeOptions::strict(), Output::Text);
                Some(input::text(&cleaned, self.options.max_length))
            }
            InputKind::Email => input::email(value),
            InputKind::Url => input::url(value),
        }
    }
}

/// Request bodies carrying user-authored content, cleaned by
/// [`CleanJson`](crate::auth::CleanJson) before a handler sees them.
pub trait Sanitize: Sized {
    /// Clean every user-authored field. `Err` names the first field that
    /// could not be made acceptable.
    fn sanitize(self, sanitizer: &ContentSanitizer) -> Result<Self, &'static str>;
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn sanitizer() -> ContentSanitizer {
        ContentSanitizer::default()
    }

    fn assert_safe(output: &str) {
        let lower = output.to_lowercase();
        for needle in ["<script", "onerror=", "onload=", "javascript:", "<iframe", "<svg"] {
            assert!(!lower.contains(needle), "{needle} survived in {output}");
        }
    }

    #[test]
    fn test_script_removed_paragraph_kept() {
        let out = sanitizer().clean("<p>ok</p><script>alert(1)</script>");
        assert_eq!(out, "<p>ok</p>");
        assert_safe(&out);
    }

    #[test]
    fn test_attack_vectors() {
        let s = sanitizer();
        let vectors = [
            "<img src=x onerror=alert(1)>",
            "<IMG SRC=\"javascript:alert('XSS');\">",
            "<a href=\"jav&#x09;ascript:alert(1)\">x</a>",
            "<a href=\"&#106;&#97;&#118;&#97;&#115;&#99;&#114;&#105;&#112;&#116;&#58;alert(1)\">x</a>",
            "<a href=\"java\u{200B}script:alert(1)\">x</a>",
            "<a href=\"javascript%3Aalert(1)\">x</a>",
            "<svg/onload=alert(1)>",
            "<svg><script>alert(1)</script></svg>",
            "<iframe src=\"https://evil.example\"></iframe>",
            "<scr<!-- -->ipt>alert(1)</script>",
            "<<script>script>alert(1)<</script>/script>",
            "<body onload=alert(1)>",
            "<a href=\"vbscript:msgbox(1)\">x</a>",
            "<a href=\"data:text/html;base64,PHNjcmlwdD4=\">x</a>",
            "<div style=\"background:url(javascript:alert(1))\">x</div>",
            "<math><mtext><script>alert(1)</script></mtext></math>",
            "<p title=\"\" onmouseover=alert(1)>x</p>",
            "<a/href=\"javascript:alert(1)\">x</a>",
        ];
        for vector in vectors {
            let out = s.clean(vector);
            assert_safe(&out);
        }
    }

    #[test]
    fn test_unsafe_urls_become_hash() {
        let s = sanitizer();
        assert_eq!(
            s.clean("<a href=\"javascript:alert(1)\">x</a>"),
            "<a href=\"#\">x</a>"
        );
        assert_eq!(
            s.clean("<a href=\"https://example.com/?a=1&amp;b=2\">x</a>"),
            "<a href=\"https://example.com/?a=1&amp;b=2\">x</a>"
        );
    }

    #[test]
    fn test_data_images_only_on_img_src() {
        let s = sanitizer();
        assert_eq!(
            s.clean("<img src=\"data:image/png;base64,AAAA\" alt=\"dot\">"),
            "<img src=\"data:image/png;base64,AAAA\" alt=\"dot\">"
        );
        assert_eq!(
            s.clean("<a href=\"data:image/png;base64,AAAA\">x</a>"),
            "<a href=\"#\">x</a>"
        );
    }

    #[test]
    fn test_disallowed_tags_unwrapped() {
        let s = sanitizer();
        assert_eq!(s.clean("<marquee><b>hi</b></marquee>"), "<b>hi</b>");
        assert_eq!(
            s.sanitize_html("<h1>T</h1><p>x</p>", &SanitizeOptions::basic()),
            "T<p>x</p>"
        );
        assert_eq!(
            s.sanitize_html("<b>x</b> &amp; y", &SanitizeOptions::strict()),
            "x &amp; y"
        );
    }

    #[test]
    fn test_idempotent() {
        let s = sanitizer();
        let inputs = [
            "<p>ok</p><script>alert(1)</script>",
            "<P CLASS=x><B>bold<I>both</P>tail",
            "<a href='/x?a=1&b=2' title=\"a &quot;q&quot;\">l</a>",
            "1 < 2 && 3 > 2 &lt;b&gt;",
            "<img src=x alt=\"it's\"><br/><hr>",
            "<div><div><span>deep</div></span>",
            "java<x>script:alert(1)",
            "&amp;lt;script&amp;gt;",
            "<a href=\"&amp;#106;avascript:x\">y</a>",
        ];
        for input in inputs {
            let once = s.clean(input);
            let twice = s.clean(&once);
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_length_budget() {
        let options = SanitizeOptions {
            max_length: 5,
            ..SanitizeOptions::default()
        };
        let s = ContentSanitizer::new(options.clone());
        let out = s.sanitize_html("<p>hello world</p><p>more</p>", &options);
        assert_eq!(out, "<p>hello</p>");
        assert_eq!(s.clean(&out), out);
    }

    #[test]
    fn test_input_byte_cap() {
        let options = SanitizeOptions {
            max_input_bytes: 8,
            ..SanitizeOptions::default()
        };
        let s = ContentSanitizer::default();
        assert_eq!(s.sanitize_html("<b>abcdefgh</b>", &options), "<b>abcde</b>");
    }

    #[test]
    fn test_deep_nesting_is_bounded_and_fast() {
        let depth = 10_000;
        let input = format!("{}x{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let s = sanitizer();
        s.clean("<p>warm up javascript:</p>");

        let start = Instant::now();
        let out = s.clean(&input);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(out.matches("<div>").count(), 32);
        assert_eq!(out.matches("</div>").count(), 32);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitizer().clean(""), "");
        assert!(sanitizer().validate("").is_valid);
    }

    #[test]
    fn test_validate() {
        let result = sanitizer().validate("<img src=x onerror=alert(1)>");
        assert!(!result.is_valid);
        assert_eq!(result.highest_severity(), Some(Severity::High));
    }

    #[test]
    fn test_sanitize_input() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize_input("  <b>Alice</b><script>x</script> ", InputKind::Text),
            Some("Alice".to_string())
        );
        assert_eq!(
            s.sanitize_input("<script>x</script>", InputKind::Text),
            Some(String::new())
        );
        assert_eq!(
            s.sanitize_input("Bob@Example.com", InputKind::Email),
            Some("bob@example.com".to_string())
        );
        assert_eq!(s.sanitize_input("bob@", InputKind::Email), None);
        assert_eq!(
            s.sanitize_input("https://example.com/x", InputKind::Url),
            Some("https://example.com/x".to_string())
        );
        assert_eq!(s.sanitize_input("javascript:alert(1)", InputKind::Url), None);
    }
}
