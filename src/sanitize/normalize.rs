//! Normalization applied before anything is matched against an allow- or
//! deny-list, so encoded and split variants of a construct look the same as
//! the plain one.

use std::borrow::Cow;

/// Characters that render as nothing and are used to split keywords.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{0}' | '\u{AD}' | '\u{180E}' | '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
    )
}

/// Remove zero-width, bidi-control and NUL characters.
pub fn strip_invisible(input: &str) -> Cow<'_, str> {
    if input.chars().any(is_invisible) {
        Cow::Owned(input.chars().filter(|c| !is_invisible(*c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

/// Remove `<!-- ... -->` comments. An unterminated comment swallows the rest.
pub fn strip_comments(input: &str) -> Cow<'_, str> {
    if !input.contains("<!--") {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{A0}',
        "colon" => ':',
        "semi" => ';',
        "tab" => '\t',
        "newline" => '\n',
        "lpar" => '(',
        "rpar" => ')',
        "sol" => '/',
        "bsol" => '\\',
        "period" => '.',
        "comma" => ',',
        "excl" => '!',
        "num" => '#',
        "equals" => '=',
        "quest" => '?',
        "grave" => '`',
        _ => return None,
    };
    Some(c)
}

/// Decode one `&...;` reference at the start of `s` (which begins after the
/// `&`). Returns the character and the number of bytes consumed.
fn decode_reference(s: &str) -> Option<(char, usize)> {
    let bytes = s.as_bytes();
    if bytes.first() == Some(&b'#') {
        let (radix, start) = match bytes.get(1) {
            Some(b'x') | Some(b'X') => (16, 2),
            _ => (10, 1),
        };
        let digits = s[start..]
            .bytes()
            .take_while(|b| (*b as char).is_digit(radix))
            .take(8)
            .count();
        if digits == 0 {
            return None;
        }
        let value = u32::from_str_radix(&s[start..start + digits], radix).ok()?;
        let mut consumed = start + digits;
        if bytes.get(consumed) == Some(&b';') {
            consumed += 1;
        }
        let c = char::from_u32(value)
            .filter(|c| *c != '\0')
            .unwrap_or('\u{FFFD}');
        return Some((c, consumed));
    }

    let len = s
        .bytes()
        .take(10)
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    if len == 0 || s.as_bytes().get(len) != Some(&b';') {
        return None;
    }
    let c = named_entity(&s[..len].to_ascii_lowercase())?;
    Some((c, len + 1))
}

/// Decode numeric and common named character references, once.
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        match decode_reference(after) {
            Some((c, consumed)) => {
                out.push(c);
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decode `%XX` escapes, once. Invalid UTF-8 is replaced.
pub fn percent_decode(input: &str) -> Cow<'_, str> {
    if !input.contains('%') {
        return Cow::Borrowed(input);
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = [bytes[i + 1], bytes[i + 2]];
            if let Some(b) = std::str::from_utf8(&hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

/// Fully unwrap a value for matching: repeated entity and percent decoding,
/// invisible characters removed, lower-cased.
pub fn canonical(input: &str) -> String {
    let mut value = strip_invisible(input).into_owned();
    for _ in 0..3 {
        let decoded = percent_decode(&decode_entities(&value)).into_owned();
        if decoded == value {
            break;
        }
        value = decoded;
    }
    strip_invisible(&value).to_lowercase()
}

/// Escape text for an HTML text node or quoted attribute value.
pub fn escape_html(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
