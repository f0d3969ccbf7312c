//! Sanitizers for single form fields.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_URL_LENGTH: usize = 2048;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$",
    )
    .expect("static pattern")
});

/// Collapse a free-text value: control characters other than newline and
/// tab removed, surrounding whitespace trimmed, length capped in characters.
pub(super) fn text(cleaned: &str, max_chars: usize) -> String {
    cleaned
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .trim()
        .chars()
        .take(max_chars)
        .collect()
}

/// Lower-cased address, or `None` if it is not a plausible mailbox.
pub(super) fn email(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    if value.len() > MAX_EMAIL_LENGTH {
        return None;
    }
    let (local, _) = value.split_once('@')?;
    if local.len() > 64 || !EMAIL.is_match(&value) {
        return None;
    }
    Some(value)
}

/// Absolute `http`/`https` URL without embedded credentials, re-serialized.
pub(super) fn url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.len() > MAX_URL_LENGTH || value.chars().any(char::is_control) {
        return None;
    }
    let parsed = Url::parse(value).ok()?;
    if !matches!(parsed.scheme(), "http" | "https")
        || parsed.host_str().is_none_or(str::is_empty)
        || !parsed.username().is_empty()
        || parsed.password().is_some()
    {
        return None;
    }
    Some(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text() {
        assert_eq!(text("  hi\u{7}\nthere\t ", 100), "hi\nthere");
        assert_eq!(text("abcdef", 3), "abc");
        assert_eq!(text("   ", 10), "");
    }

    #[test]
    fn test_email() {
        assert_eq!(email(" Alice@Example.COM "), Some("alice@example.com".to_string()));
        assert_eq!(email("a.b+tag@mail.example.org"), Some("a.b+tag@mail.example.org".to_string()));
        assert_eq!(email("no-at-sign"), None);
        assert_eq!(email("a@b"), None);
        assert_eq!(email("a..b@example.com"), None);
        assert_eq!(email("a@-example.com"), None);
        assert_eq!(email("<script>@example.com"), None);
        assert_eq!(email(&format!("{}@example.com", "a".repeat(65))), None);
    }

    #[test]
    fn test_url() {
        assert_eq!(url("https://example.com"), Some("https://example.com/".to_string()));
        assert_eq!(
            url(" http://example.com/a b?q=1 "),
            Some("http://example.com/a%20b?q=1".to_string())
        );
        assert_eq!(url("javascript:alert(1)"), None);
        assert_eq!(url("data:text/html,x"), None);
        assert_eq!(url("/relative"), None);
        assert_eq!(url("https://user:pw@example.com"), None);
        assert_eq!(url("ftp://example.com"), None);
        assert_eq!(url("http://exa\nmple.com"), None);
    }
}
