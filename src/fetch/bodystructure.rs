//! BODY / BODYSTRUCTURE generation
//!
//! A BODYSTRUCTURE describes the MIME tree of a message as nested
//! parenthesized lists (RFC 3501 section 7.4.2). The non-extended form
//! (the `BODY` data item) stops after the basic fields; the extended
//! form adds disposition, language, and location. `message/rfc822`
//! parts embed the inner message's ENVELOPE and structure; text parts
//! carry a line count.

use super::envelope::envelope;
use super::value::FetchValue;
use crate::error::Result;
use mailparse::{MailHeaderMap, ParsedMail};

/// Build the BODY (non-extended) or BODYSTRUCTURE (extended) value.
pub fn bodystructure(parsed: &ParsedMail, extended: bool) -> Result<FetchValue> {
    if parsed.ctype.mimetype.starts_with("multipart/") {
        multipart(parsed, extended)
    } else {
        single_part(parsed, extended)
    }
}

fn multipart(parsed: &ParsedMail, extended: bool) -> Result<FetchValue> {
    let mut items = Vec::new();
    for child in &parsed.subparts {
        items.push(bodystructure(child, extended)?);
    }
    items.push(FetchValue::Quoted(subtype(parsed).to_ascii_uppercase()));
    if extended {
        items.push(content_params(parsed));
        items.extend(extension_fields(parsed));
    }
    Ok(FetchValue::List(items))
}

fn single_part(parsed: &ParsedMail, extended: bool) -> Result<FetchValue> {
    let maintype = maintype(parsed).to_ascii_uppercase();
    let subtype = subtype(parsed).to_ascii_uppercase();
    let size = parsed.raw_bytes.len() as u64;

    let mut items = vec![
        FetchValue::Quoted(maintype.clone()),
        FetchValue::Quoted(subtype.clone()),
        content_params(parsed),
        FetchValue::quoted_or_nil(parsed.headers.get_first_value("Content-ID").as_deref()),
        FetchValue::quoted_or_nil(
            parsed
                .headers
                .get_first_value("Content-Description")
                .as_deref(),
        ),
        FetchValue::Quoted(
            parsed
                .headers
                .get_first_value("Content-Transfer-Encoding")
                .unwrap_or_else(|| "7BIT".to_string())
                .to_ascii_uppercase(),
        ),
        FetchValue::Number(size),
    ];

    if maintype == "TEXT" {
        items.push(FetchValue::Number(count_lines(parsed.raw_bytes)));
    } else if maintype == "MESSAGE" && subtype == "RFC822" {
        // Embedded message: its envelope, its structure, and the line
        // count of its decoded body.
        let inner_raw = parsed.get_body_raw()?;
        let inner = mailparse::parse_mail(&inner_raw)?;
        items.push(envelope(&inner));
        items.push(bodystructure(&inner, extended)?);
        items.push(FetchValue::Number(count_lines(&inner.get_body_raw()?)));
    }

    if extended {
        items.extend(extension_fields(parsed));
    }
    Ok(FetchValue::List(items))
}

fn maintype<'a>(parsed: &'a ParsedMail) -> &'a str {
    parsed
        .ctype
        .mimetype
        .split_once('/')
        .map_or(parsed.ctype.mimetype.as_str(), |(main, _)| main)
}

fn subtype<'a>(parsed: &'a ParsedMail) -> &'a str {
    parsed
        .ctype
        .mimetype
        .split_once('/')
        .map_or("", |(_, sub)| sub)
}

/// Content-Type parameters as `("NAME" "value" ...)`, or `NIL`.
/// A text part always reports its charset even when the header left
/// it implicit.
fn content_params(parsed: &ParsedMail) -> FetchValue {
    let mut items = Vec::new();
    if parsed.ctype.mimetype.starts_with("text/")
        && !parsed.ctype.params.contains_key("charset")
    {
        items.push(FetchValue::Quoted("CHARSET".to_string()));
        items.push(FetchValue::Quoted(parsed.ctype.charset.to_ascii_uppercase()));
    }
    for (name, value) in &parsed.ctype.params {
        items.push(FetchValue::Quoted(name.to_ascii_uppercase()));
        items.push(FetchValue::Quoted(value.clone()));
    }
    if items.is_empty() {
        FetchValue::Nil
    } else {
        FetchValue::List(items)
    }
}

/// Extended fields: `(disposition NIL)`, language list, location.
fn extension_fields(parsed: &ParsedMail) -> [FetchValue; 3] {
    let disposition = parsed
        .headers
        .get_first_value("Content-Disposition")
        .and_then(|raw| {
            raw.split(';')
                .next()
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
        })
        .map_or(FetchValue::Nil, |value| {
            FetchValue::List(vec![FetchValue::Quoted(value), FetchValue::Nil])
        });

    let language = parsed
        .headers
        .get_first_value("Content-Language")
        .map_or(FetchValue::Nil, |raw| {
            FetchValue::List(
                raw.split(',')
                    .map(|tag| FetchValue::Quoted(tag.trim().to_string()))
                    .collect(),
            )
        });

    let location = FetchValue::quoted_or_nil(
        parsed
            .headers
            .get_first_value("Content-Location")
            .as_deref(),
    );

    [disposition, language, location]
}

#[allow(clippy::cast_possible_truncation)]
fn count_lines(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'\n').count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(raw: &[u8], extended: bool) -> String {
        let parsed = mailparse::parse_mail(raw).unwrap();
        String::from_utf8(bodystructure(&parsed, extended).unwrap().to_bytes()).unwrap()
    }

    #[test]
    fn plain_text_reports_charset_and_lines() {
        let out = rendered(
            b"Content-Type: text/plain; charset=utf-8\r\n\r\nline one\nline two\n",
            true,
        );
        assert!(out.starts_with("(\"TEXT\" \"PLAIN\" (\"CHARSET\" "));
        assert!(out.to_ascii_uppercase().contains("(\"CHARSET\" \"UTF-8\")"));
        assert!(out.contains("\"7BIT\""));
        // trailing extension fields: disposition, language, location
        assert!(out.ends_with("NIL NIL NIL)"));
    }

    #[test]
    fn implicit_charset_is_reported_for_text() {
        let out = rendered(b"Subject: x\r\n\r\nhello\n", true);
        assert!(out.contains("(\"CHARSET\" \"US-ASCII\")"));
    }

    #[test]
    fn non_extended_form_has_no_extension_fields() {
        let extended = rendered(b"Subject: x\r\n\r\nhello\n", true);
        let basic = rendered(b"Subject: x\r\n\r\nhello\n", false);
        assert!(extended.len() > basic.len());
        assert!(!basic.ends_with("NIL NIL NIL)"));
    }

    #[test]
    fn multipart_concatenates_children_then_subtype() {
        let raw = b"Content-Type: multipart/mixed; boundary=XX\r\n\r\n\
            --XX\r\nContent-Type: text/plain\r\n\r\nhi\r\n\
            --XX\r\nContent-Type: application/pdf\r\n\r\nPDF\r\n\
            --XX--\r\n";
        let out = rendered(raw, true);
        assert!(out.contains("(\"TEXT\" \"PLAIN\""));
        assert!(out.contains("(\"APPLICATION\" \"PDF\""));
        assert!(out.contains("\"MIXED\" (\"BOUNDARY\" \"XX\")"));
    }

    #[test]
    fn basic_multipart_is_children_and_subtype_only() {
        let raw = b"Content-Type: multipart/alternative; boundary=YY\r\n\r\n\
            --YY\r\nContent-Type: text/plain\r\n\r\na\r\n\
            --YY--\r\n";
        let out = rendered(raw, false);
        assert!(out.ends_with("\"ALTERNATIVE\")"));
    }

    #[test]
    fn embedded_message_carries_envelope_and_structure() {
        let raw = b"Content-Type: message/rfc822\r\n\r\n\
            Subject: inner\r\nFrom: in@x.org\r\n\r\ninner body\n";
        let out = rendered(raw, true);
        assert!(out.contains("\"MESSAGE\" \"RFC822\""));
        assert!(out.contains("\"inner\""));
        assert!(out.contains("(\"TEXT\" \"PLAIN\""));
    }

    #[test]
    fn disposition_and_language() {
        let raw = b"Content-Type: application/pdf\r\n\
            Content-Disposition: attachment; filename=a.pdf\r\n\
            Content-Language: en, de\r\n\r\nPDF";
        let out = rendered(raw, true);
        assert!(out.contains("(\"attachment\" NIL)"));
        assert!(out.contains("(\"en\" \"de\")"));
    }
}
