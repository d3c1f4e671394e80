//! ENVELOPE generation
//!
//! The ENVELOPE is a 10-tuple summarizing the message header: date,
//! subject, from, sender, reply-to, to, cc, bcc, in-reply-to,
//! message-id. Address fields are lists of 4-tuples
//! `(personal NIL mailbox host)`; absent fields are `NIL`.

use super::value::FetchValue;
use mailparse::{MailAddr, MailHeaderMap, ParsedMail, SingleInfo};

/// Build the ENVELOPE value for a parsed message.
#[must_use]
pub fn envelope(parsed: &ParsedMail) -> FetchValue {
    let header = |name: &str| parsed.headers.get_first_value(name);
    FetchValue::List(vec![
        FetchValue::quoted_or_nil(header("Date").as_deref()),
        FetchValue::quoted_or_nil(header("Subject").as_deref()),
        address_field(header("From").as_deref()),
        address_field(header("Sender").as_deref()),
        address_field(header("Reply-To").as_deref()),
        address_field(header("To").as_deref()),
        address_field(header("Cc").as_deref()),
        address_field(header("Bcc").as_deref()),
        FetchValue::quoted_or_nil(header("In-Reply-To").as_deref()),
        FetchValue::quoted_or_nil(header("Message-ID").as_deref()),
    ])
}

/// An address header as a list of 4-tuples, or `NIL` when the header
/// is absent or unparseable.
fn address_field(value: Option<&str>) -> FetchValue {
    let Some(value) = value else {
        return FetchValue::Nil;
    };
    let Ok(addresses) = mailparse::addrparse(value) else {
        return FetchValue::Nil;
    };

    let mut tuples = Vec::new();
    for address in addresses.iter() {
        match address {
            MailAddr::Single(single) => tuples.push(address_tuple(single)),
            MailAddr::Group(group) => {
                tuples.extend(group.addrs.iter().map(address_tuple));
            }
        }
    }
    if tuples.is_empty() {
        FetchValue::Nil
    } else {
        FetchValue::List(tuples)
    }
}

/// `(personal NIL mailbox host)`; the second slot (source route) is
/// obsolete and always `NIL`.
fn address_tuple(single: &SingleInfo) -> FetchValue {
    let (mailbox, host) = single
        .addr
        .rsplit_once('@')
        .map_or((single.addr.as_str(), ""), |(mailbox, host)| (mailbox, host));
    FetchValue::List(vec![
        FetchValue::quoted_or_nil(single.display_name.as_deref()),
        FetchValue::Nil,
        FetchValue::Quoted(mailbox.to_string()),
        FetchValue::Quoted(host.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(raw: &[u8]) -> String {
        let parsed = mailparse::parse_mail(raw).unwrap();
        String::from_utf8(envelope(&parsed).to_bytes()).unwrap()
    }

    #[test]
    fn full_envelope() {
        let out = rendered(
            b"Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
              Subject: Greetings\r\n\
              From: Alice Example <alice@example.org>\r\n\
              To: bob@example.org\r\n\
              Message-ID: <abc@example.org>\r\n\
              \r\nbody",
        );
        assert!(out.starts_with("(\"Mon, 1 Jan 2024 12:00:00 +0000\" \"Greetings\" "));
        assert!(out.contains("((\"Alice Example\" NIL \"alice\" \"example.org\"))"));
        assert!(out.contains("((NIL NIL \"bob\" \"example.org\"))"));
        assert!(out.ends_with("NIL \"<abc@example.org>\")"));
    }

    #[test]
    fn absent_fields_are_nil() {
        let out = rendered(b"Subject: x\r\n\r\n");
        // date NIL, subject, then six NIL address slots and two NIL strings
        assert_eq!(out, "(NIL \"x\" NIL NIL NIL NIL NIL NIL NIL NIL)");
    }

    #[test]
    fn multiple_recipients_become_multiple_tuples() {
        let out = rendered(b"To: a@x.org, B <b@y.org>\r\n\r\n");
        assert!(out.contains(
            "((NIL NIL \"a\" \"x.org\") (\"B\" NIL \"b\" \"y.org\"))"
        ));
    }

    #[test]
    fn address_without_domain_gets_empty_host() {
        let out = rendered(b"From: postmaster\r\n\r\n");
        assert!(out.contains("((NIL NIL \"postmaster\" \"\"))"));
    }
}
