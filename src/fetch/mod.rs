//! FETCH data-item engine
//!
//! Two surfaces: **parsing** a client's data-item list (bracketed
//! sections and partial specifiers are opaque substrings, quoted
//! strings are never split, the `ALL`/`FAST`/`FULL` macros expand only
//! when they stand alone) and **formatting** each item into a typed
//! [`FetchValue`] fragment.
//!
//! ## Module layout
//!
//! - `value` -- the discriminated union fragments are built from
//! - `envelope` -- ENVELOPE 10-tuples
//! - `bodystructure` -- BODY / BODYSTRUCTURE MIME trees
//! - `section` -- `BODY[...]` section extraction

pub mod value;

mod bodystructure;
mod envelope;
mod section;

pub use value::FetchValue;

use crate::error::Result;
use crate::flag::letters_to_atoms;
use crate::store::StoredMessage;
use chrono::{DateTime, Utc};
use mailparse::ParsedMail;
use std::time::SystemTime;

/// Split a FETCH data-item list into individual items.
///
/// One level of outer parentheses is stripped. Whitespace splits items
/// only at bracket/paren depth zero and outside quoted strings, so
/// `BODY[HEADER.FIELDS (From To)]` stays one item.
#[must_use]
pub fn parse_items(item_names: &str) -> Vec<String> {
    let mut input = item_names.trim();
    if input.starts_with('(') && input.ends_with(')') {
        input = &input[1..input.len() - 1];
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => bracket_depth += 1,
            ']' if !in_quotes => bracket_depth = bracket_depth.saturating_sub(1),
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth = paren_depth.saturating_sub(1),
            ' ' if !in_quotes && bracket_depth == 0 && paren_depth == 0 => {
                if !current.trim().is_empty() {
                    items.push(current.trim().to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

/// Expand `ALL`, `FAST`, or `FULL` when it is the only item.
#[must_use]
pub fn expand_macros(items: Vec<String>) -> Vec<String> {
    let expansion: Option<&[&str]> = if items.len() == 1 {
        match items[0].to_ascii_uppercase().as_str() {
            "ALL" => Some(&["FLAGS", "INTERNALDATE", "RFC822.SIZE", "ENVELOPE"]),
            "FAST" => Some(&["FLAGS", "INTERNALDATE", "RFC822.SIZE"]),
            "FULL" => Some(&["FLAGS", "INTERNALDATE", "RFC822.SIZE", "ENVELOPE", "BODY"]),
            _ => None,
        }
    } else {
        None
    };
    expansion.map_or(items, |names| {
        names.iter().map(ToString::to_string).collect()
    })
}

/// Whether fetching this item sets `\Seen`: every `BODY[...]` variant
/// that is not `BODY.PEEK[...]`, and bare `RFC822`.
#[must_use]
pub fn item_sets_seen(item: &str) -> bool {
    let upper = item.to_ascii_uppercase();
    upper.starts_with("BODY[") || upper == "RFC822"
}

/// Format one data item for one message. `Ok(None)` for items this
/// server does not implement; they are skipped, not rejected.
///
/// The returned string is the item name echoed back to the client in
/// front of the value.
pub fn format_item(
    item: &str,
    message: &StoredMessage,
    parsed: &ParsedMail,
) -> Result<Option<(String, FetchValue)>> {
    let upper = item.to_ascii_uppercase();

    if upper.starts_with("BODY[") || upper.starts_with("BODY.PEEK[") {
        let Some(open) = item.find('[') else {
            return Ok(None);
        };
        let Some(close) = item.rfind(']') else {
            return Ok(None);
        };
        // A trailing <n.m> partial specifier is parsed as part of the
        // item but not served.
        if close != item.len() - 1 || close < open {
            return Ok(None);
        }
        let inner = &item[open + 1..close];
        return Ok(section::body_section(parsed, inner).map(|v| (item.to_string(), v)));
    }

    let value = match upper.as_str() {
        "UID" => FetchValue::Number(u64::from(message.uid)),
        "FLAGS" => FetchValue::List(
            letters_to_atoms(&message.flags, message.recent)
                .into_iter()
                .map(FetchValue::atom)
                .collect(),
        ),
        "INTERNALDATE" => FetchValue::Quoted(internal_date_string(message.internal_date)),
        "RFC822.SIZE" => FetchValue::Number(message.raw.len() as u64),
        "RFC822" => FetchValue::Literal(message.raw.clone()),
        "RFC822.HEADER" => FetchValue::Literal(headers_block(parsed).into_bytes()),
        "RFC822.TEXT" => FetchValue::Literal(text_body(parsed).into_bytes()),
        "ENVELOPE" => envelope::envelope(parsed),
        "BODY" => bodystructure::bodystructure(parsed, false)?,
        "BODYSTRUCTURE" => bodystructure::bodystructure(parsed, true)?,
        _ => return Ok(None),
    };
    Ok(Some((item.to_string(), value)))
}

/// RFC 2822 date in GMT, the INTERNALDATE representation.
#[must_use]
pub fn internal_date_string(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Reconstruct the header block as `Name: value` lines with CRLF.
#[must_use]
pub(crate) fn headers_block(parsed: &ParsedMail) -> String {
    let mut block = String::new();
    for header in &parsed.headers {
        block.push_str(&header.get_key_ref());
        block.push_str(": ");
        block.push_str(&header.get_value());
        block.push_str("\r\n");
    }
    block
}

/// Decoded message text: the body itself for single-part messages,
/// the first `text/plain` part for multipart ones.
#[must_use]
pub(crate) fn text_body(parsed: &ParsedMail) -> String {
    if parsed.subparts.is_empty() {
        return parsed.get_body().unwrap_or_default();
    }
    first_text_plain(parsed)
        .map(|part| part.get_body().unwrap_or_default())
        .unwrap_or_default()
}

fn first_text_plain<'a, 'b>(parsed: &'a ParsedMail<'b>) -> Option<&'a ParsedMail<'b>> {
    if parsed.subparts.is_empty() && parsed.ctype.mimetype == "text/plain" {
        return Some(parsed);
    }
    parsed.subparts.iter().find_map(first_text_plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn message(raw: &[u8], flags: &str, recent: bool) -> StoredMessage {
        StoredMessage {
            key: "k".to_string(),
            uid: 7,
            flags: flags.to_string(),
            recent,
            raw: raw.to_vec(),
            internal_date: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    fn format(item: &str, raw: &[u8], flags: &str, recent: bool) -> Option<String> {
        let message = message(raw, flags, recent);
        let parsed = mailparse::parse_mail(&message.raw).unwrap();
        format_item(item, &message, &parsed)
            .unwrap()
            .map(|(name, value)| {
                format!("{name} {}", String::from_utf8_lossy(&value.to_bytes()))
            })
    }

    const RAW: &[u8] = b"From: a@x.org\r\nSubject: Hi\r\n\r\nhello\r\n";

    #[test]
    fn splits_plain_items() {
        assert_eq!(
            parse_items("(FLAGS UID RFC822.SIZE)"),
            vec!["FLAGS", "UID", "RFC822.SIZE"]
        );
    }

    #[test]
    fn keeps_bracketed_sections_together() {
        assert_eq!(
            parse_items("(UID BODY.PEEK[HEADER.FIELDS (From To)] FLAGS)"),
            vec!["UID", "BODY.PEEK[HEADER.FIELDS (From To)]", "FLAGS"]
        );
    }

    #[test]
    fn keeps_quoted_strings_together() {
        assert_eq!(parse_items("\"a b\" c"), vec!["\"a b\"", "c"]);
    }

    #[test]
    fn partial_specifier_stays_attached() {
        assert_eq!(parse_items("BODY[]<0.100> UID"), vec!["BODY[]<0.100>", "UID"]);
    }

    #[test]
    fn macros_expand_only_alone() {
        assert_eq!(
            expand_macros(vec!["FAST".to_string()]),
            vec!["FLAGS", "INTERNALDATE", "RFC822.SIZE"]
        );
        assert_eq!(
            expand_macros(vec!["ALL".to_string(), "UID".to_string()]),
            vec!["ALL", "UID"]
        );
    }

    #[test]
    fn seen_side_effect_classification() {
        assert!(item_sets_seen("BODY[]"));
        assert!(item_sets_seen("body[header]"));
        assert!(item_sets_seen("RFC822"));
        assert!(!item_sets_seen("BODY.PEEK[]"));
        assert!(!item_sets_seen("RFC822.SIZE"));
        assert!(!item_sets_seen("BODY"));
    }

    #[test]
    fn uid_and_size() {
        assert_eq!(format("UID", RAW, "", false).unwrap(), "UID 7");
        assert_eq!(
            format("RFC822.SIZE", RAW, "", false).unwrap(),
            format!("RFC822.SIZE {}", RAW.len())
        );
    }

    #[test]
    fn flags_prepend_recent() {
        assert_eq!(
            format("FLAGS", RAW, "S", true).unwrap(),
            "FLAGS (\\Recent \\Seen)"
        );
        assert_eq!(format("FLAGS", RAW, "", false).unwrap(), "FLAGS ()");
    }

    #[test]
    fn internaldate_is_quoted_gmt() {
        let out = format("INTERNALDATE", RAW, "", false).unwrap();
        assert!(out.starts_with("INTERNALDATE \""));
        assert!(out.ends_with("GMT\""));
    }

    #[test]
    fn rfc822_is_a_literal_of_the_raw_message() {
        let out = format("RFC822", RAW, "", false).unwrap();
        assert!(out.starts_with(&format!("RFC822 {{{}}}\r\n", RAW.len())));
    }

    #[test]
    fn body_section_echoes_the_item_name() {
        let out = format("BODY.PEEK[HEADER.FIELDS (Subject)]", RAW, "", false).unwrap();
        assert!(out.starts_with("BODY.PEEK[HEADER.FIELDS (Subject)] {"));
        assert!(out.contains("Subject: Hi"));
    }

    #[test]
    fn unsupported_items_are_skipped() {
        assert!(format("X-NONSENSE", RAW, "", false).is_none());
        assert!(format("BODY[1.MIME]", RAW, "", false).is_none());
        assert!(format("BODY[]<0.100>", RAW, "", false).is_none());
    }

    #[test]
    fn text_body_prefers_text_plain_part() {
        let raw = b"Content-Type: multipart/alternative; boundary=ZZ\r\n\r\n\
            --ZZ\r\nContent-Type: text/html\r\n\r\n<b>hi</b>\r\n\
            --ZZ\r\nContent-Type: text/plain\r\n\r\nplain hi\r\n\
            --ZZ--\r\n";
        let parsed = mailparse::parse_mail(raw).unwrap();
        assert_eq!(text_body(&parsed).trim(), "plain hi");
    }
}
