//! Builtin callbacks.
//!
//! These are registered by [`Engine::new`][crate::Engine::new] under the
//! names `h`, `e`, `u`, `r` and `j`.

use std::fmt::Write;

/// Escapes the HTML special characters `&`, `"`, `<` and `>`.
///
/// Registered as `h`, e.g. `{name:h}`.
#[cfg_attr(docsrs, doc(cfg(feature = "builtins")))]
pub fn html_special_chars(s: &str) -> String {
    html_escape::encode_double_quoted_attribute(s).into_owned()
}

/// Escapes the HTML special characters like [`html_special_chars`] and
/// also converts all non-ASCII characters to numeric character references.
///
/// Registered as `e`.
#[cfg_attr(docsrs, doc(cfg(feature = "builtins")))]
pub fn html_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in html_special_chars(s).chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let _ = write!(out, "&#{};", u32::from(c));
        }
    }
    out
}

/// Encodes the string for use in a URL query, spaces become `+`.
///
/// Registered as `u`.
#[cfg_attr(docsrs, doc(cfg(feature = "builtins")))]
pub fn url_encode(s: &str) -> String {
    percent_encode(s, b"-_.", true)
}

/// Encodes the string for use in a URL path, spaces become `%20`.
///
/// Registered as `r`.
#[cfg_attr(docsrs, doc(cfg(feature = "builtins")))]
pub fn raw_url_encode(s: &str) -> String {
    percent_encode(s, b"-_.~", false)
}

fn percent_encode(s: &str, safe: &[u8], plus: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || safe.contains(&b) {
            out.push(char::from(b));
        } else if plus && b == b' ' {
            out.push('+');
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Escapes the string for use inside a JavaScript string literal.
///
/// Registered as `j`.
#[cfg_attr(docsrs, doc(cfg(feature = "builtins")))]
pub fn js_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\'' => out.push_str("\\x27"),
            '"' => out.push_str("\\x22"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}
