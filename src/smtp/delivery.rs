//! Message delivery into the shared store.
//!
//! Submission servers are the last point where a message can pick up
//! the headers relaying and clients expect, so missing Date,
//! Message-ID, From, and To headers are filled in before the bytes are
//! persisted. Delivery then goes through the same [`Folder::save`]
//! path the IMAP side uses, keeping UID assignment in one place.

use super::session::SmtpContext;
use crate::error::Result;
use mailparse::MailHeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Deliver a submitted message: `Sent` copy for the sender, INBOX copy
/// for every local recipient.
pub(crate) async fn deliver(
    ctx: &SmtpContext,
    mail_from: &str,
    recipients: &[String],
    raw: Vec<u8>,
) -> Result<()> {
    let raw = ensure_headers(raw, mail_from, recipients, &ctx.host_name);
    let sender = local_part(mail_from);

    let sent = ctx.store.folder(&sender, Some("Sent"));
    sent.create().await?;
    let uid = sent.save(raw.clone()).await?;
    info!("stored Sent copy for {sender} as uid {uid}");

    for recipient in recipients {
        let local = local_part(recipient);
        let inbox = ctx.store.folder(&local, None);
        inbox.create().await?;
        let uid = inbox.save(raw.clone()).await?;
        info!("delivered message to {local} as uid {uid}");
    }
    Ok(())
}

/// The mailbox directory name for an address: its local part.
pub(crate) fn local_part(address: &str) -> String {
    address
        .split('@')
        .next()
        .unwrap_or(address)
        .trim()
        .to_string()
}

fn new_message_id(host: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = MESSAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "<{}.{}.{}.{seq}@{host}>",
        now.as_secs(),
        now.subsec_micros(),
        std::process::id()
    )
}

/// Prepend any of Date, Message-ID, From, To that the submitted
/// message lacks.
fn ensure_headers(raw: Vec<u8>, mail_from: &str, recipients: &[String], host: &str) -> Vec<u8> {
    let Ok(parsed) = mailparse::parse_mail(&raw) else {
        return raw;
    };
    let missing = |name: &str| parsed.headers.get_first_value(name).is_none();

    let mut prefix = String::new();
    if missing("Date") {
        prefix.push_str(&format!("Date: {}\r\n", chrono::Utc::now().to_rfc2822()));
    }
    if missing("Message-ID") {
        prefix.push_str(&format!("Message-ID: {}\r\n", new_message_id(host)));
    }
    if missing("From") {
        prefix.push_str(&format!("From: {mail_from}\r\n"));
    }
    if missing("To") && !recipients.is_empty() {
        prefix.push_str(&format!("To: {}\r\n", recipients.join(", ")));
    }

    if prefix.is_empty() {
        return raw;
    }
    let mut out = prefix.into_bytes();
    out.extend_from_slice(&raw);
    out
}
