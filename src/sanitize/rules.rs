//! Pattern rules for [`ContentSanitizer::validate`](super::ContentSanitizer::validate).
//!
//! Rules run over the canonical form of the input, so `&#x3C;script` and
//! `<scr<!-- -->ipt` trip the same rule as `<script`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::normalize::{canonical, strip_comments, strip_invisible};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: &'static str,
    pub severity: Severity,
    /// Start of the matched text in canonical form, truncated
    pub fragment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
}

impl Validation {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}

struct Rule {
    name: &'static str,
    severity: Severity,
    pattern: Regex,
}

const FRAGMENT_CHARS: usize = 64;

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    [
        ("script-tag", Severity::Critical, r"<\s*/?\s*script\b"),
        ("script-protocol", Severity::Critical, r"(javascript|vbscript|livescript)\s*:"),
        ("event-handler", Severity::High, r"\bon[a-z]{3,}\s*="),
        (
            "embedded-content",
            Severity::High,
            r"<\s*(iframe|frame|frameset|object|embed|applet)\b",
        ),
        ("svg-markup", Severity::High, r"<\s*(svg|math)\b"),
        ("data-html", Severity::High, r"data\s*:\s*text/html"),
        (
            "style-expression",
            Severity::Medium,
            r"expression\s*\(|url\s*\(\s*['\x22]?\s*javascript",
        ),
        ("style-tag", Severity::Medium, r"<\s*style\b"),
        ("meta-refresh", Severity::Medium, r"<\s*meta\b[^>]*http-equiv"),
        ("base-tag", Severity::Medium, r"<\s*base\b"),
        ("form-markup", Severity::Low, r"<\s*(form|input|button)\b"),
    ]
    .into_iter()
    .map(|(name, severity, pattern)| Rule {
        name,
        severity,
        pattern: Regex::new(pattern).expect("static pattern"),
    })
    .collect()
});

/// Run every rule against `input`. `max_input_bytes` bounds the amount of
/// text examined; anything beyond it is itself reported.
pub(super) fn validate(input: &str, max_input_bytes: usize) -> Validation {
    let mut violations = Vec::new();

    let examined = if input.len() > max_input_bytes {
        violations.push(Violation {
            rule: "oversized-input",
            severity: Severity::Low,
            fragment: String::new(),
        });
        let mut end = max_input_bytes;
        while !input.is_char_boundary(end) {
            end -= 1;
        }
        &input[..end]
    } else {
        input
    };

    if examined.contains('\0') {
        violations.push(Violation {
            rule: "null-byte",
            severity: Severity::Medium,
            fragment: String::new(),
        });
    }

    let normalized = canonical(&strip_comments(&strip_invisible(examined)));
    for rule in RULES.iter() {
        if let Some(found) = rule.pattern.find(&normalized) {
            violations.push(Violation {
                rule: rule.name,
                severity: rule.severity,
                fragment: normalized[found.start()..]
                    .chars()
                    .take(FRAGMENT_CHARS)
                    .collect(),
            });
        }
    }

    Validation {
        is_valid: violations.is_empty(),
        violations,
    }
}
