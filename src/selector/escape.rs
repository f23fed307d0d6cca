//! Escaping of identifier fragments for CSS selectors
//!
//! Follows the CSSOM `CSS.escape()` serialization rules, so ids and class
//! names like `md:flex` or `2col` produce selectors that parse.

use std::fmt::Write;

/// Escape a string for use as a CSS identifier (id or class name)
pub fn escape_ident(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());

    if chars.len() == 1 && chars[0] == '-' {
        return "\\-".to_string();
    }

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\0' => out.push('\u{FFFD}'),
            '\u{1}'..='\u{1f}' | '\u{7f}' => push_code_point(&mut out, c),
            '0'..='9' if i == 0 => push_code_point(&mut out, c),
            '0'..='9' if i == 1 && chars[0] == '-' => push_code_point(&mut out, c),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() => {
                out.push(c)
            }
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }

    out
}

/// Escape a string for use inside a double-quoted attribute value
pub fn escape_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push('\u{FFFD}'),
            '\u{1}'..='\u{1f}' | '\u{7f}' => push_code_point(&mut out, c),
            c => out.push(c),
        }
    }
    out
}

/// `[name="value"]` with the value escaped
pub fn attr_selector(name: &str, value: &str) -> String {
    format!("[{}=\"{}\"]", name, escape_attr_value(value))
}

fn push_code_point(out: &mut String, c: char) {
    // Trailing space terminates the hex escape
    let _ = write!(out, "\\{:x} ", c as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifiers_unchanged() {
        assert_eq!(escape_ident("submit"), "submit");
        assert_eq!(escape_ident("nav-item_2"), "nav-item_2");
        assert_eq!(escape_ident("caf\u{e9}"), "caf\u{e9}");
    }

    #[test]
    fn test_utility_class_characters() {
        assert_eq!(escape_ident("md:flex"), "md\\:flex");
        assert_eq!(escape_ident("w-1/2"), "w-1\\/2");
        assert_eq!(escape_ident("hover:bg-[#fff]"), "hover\\:bg-\\[\\#fff\\]");
        assert_eq!(escape_ident("a.b"), "a\\.b");
    }

    #[test]
    fn test_leading_digits() {
        assert_eq!(escape_ident("2col"), "\\32 col");
        assert_eq!(escape_ident("-2col"), "-\\32 col");
        assert_eq!(escape_ident("-"), "\\-");
        assert_eq!(escape_ident("--x"), "--x");
    }

    #[test]
    fn test_attribute_values() {
        assert_eq!(escape_attr_value("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_attr_value("a\\b"), "a\\\\b");
        assert_eq!(attr_selector("data-testid", "login"), "[data-testid=\"login\"]");
        assert_eq!(escape_attr_value("line\nbreak"), "line\\a break");
    }

    #[test]
    fn test_escaped_output_parses() {
        for raw in ["md:flex", "2col", "a.b", "w-1/2", "x[y]"] {
            let selector = format!(".{}", escape_ident(raw));
            assert!(
                super::super::is_valid(&selector),
                "{} should be a valid selector",
                selector
            );
        }
    }
}
