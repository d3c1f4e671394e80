//! `BODY[...]` section extraction
//!
//! The bracketed section selects which slice of the message a FETCH
//! returns: the whole message, the header block, the decoded text, or
//! a header subset. All section values are counted literals. MIME part
//! numbers are not implemented; unknown sections are skipped rather
//! than rejected, matching how unsupported data items behave.

use super::value::FetchValue;
use super::{headers_block, text_body};
use mailparse::ParsedMail;
use std::collections::HashSet;

/// Resolve a section (the text between the brackets, e.g. `HEADER` or
/// `HEADER.FIELDS (From To)`) to its literal value. `None` when the
/// section form is not supported.
#[must_use]
pub fn body_section(parsed: &ParsedMail, section: &str) -> Option<FetchValue> {
    let upper = section.to_ascii_uppercase();

    if section.is_empty() {
        return Some(FetchValue::Literal(parsed.raw_bytes.to_vec()));
    }
    if upper == "HEADER" {
        return Some(FetchValue::Literal(headers_block(parsed).into_bytes()));
    }
    if upper == "TEXT" {
        return Some(FetchValue::Literal(text_body(parsed).into_bytes()));
    }
    if let Some(rest) = strip_prefix_ci(section, "HEADER.FIELDS.NOT") {
        let excluded = field_list(rest)?;
        return Some(filtered_headers(parsed, |name| !excluded.contains(name)));
    }
    if let Some(rest) = strip_prefix_ci(section, "HEADER.FIELDS") {
        let wanted = field_list(rest)?;
        return Some(filtered_headers(parsed, |name| wanted.contains(name)));
    }
    None
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.as_bytes().get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix.as_bytes()) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Parse ` (Name Name ...)` into lowercased field names.
fn field_list(rest: &str) -> Option<HashSet<String>> {
    let rest = rest.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(
        inner
            .split_whitespace()
            .map(|name| name.trim_matches('"').to_ascii_lowercase())
            .collect(),
    )
}

/// Header block filtered by name, keeping the message's original
/// casing and header order. Matching is case-insensitive.
fn filtered_headers(parsed: &ParsedMail, keep: impl Fn(&str) -> bool) -> FetchValue {
    let mut block = String::new();
    for header in &parsed.headers {
        if keep(&header.get_key_ref().to_ascii_lowercase()) {
            block.push_str(&header.get_key_ref());
            block.push_str(": ");
            block.push_str(&header.get_value());
            block.push_str("\r\n");
        }
    }
    FetchValue::Literal(block.into_bytes())
}
