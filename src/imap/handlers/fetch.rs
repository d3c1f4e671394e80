//! FETCH and UID FETCH command handlers.
//!
//! The response per message is one line (with inline counted literals
//! for message content):
//!
//! ```text
//! * 1 FETCH (UID 42 RFC822.SIZE 311 BODY[] {311}
//! <exactly 311 bytes of raw RFC 2822 message>
//! )
//! ```
//!
//! Sequence numbers are 1-based positions among the live messages
//! sorted by UID ascending. A `UID FETCH` response always carries
//! `UID n`, requested or not. Messages that vanish mid-command are
//! skipped; the command still completes OK for the rest.

use crate::fetch::{self, FetchValue};
use crate::imap::io::{write_bytes, write_line};
use crate::imap::sequence::{parse_sequence_set, UidSet};
use crate::imap::session::{ImapContext, Selected};
use crate::store::StoredMessage;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Handle FETCH (or UID FETCH when `uid_mode` is set).
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    uid_mode: bool,
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    stream: &mut BufReader<S>,
) {
    let command_name = if uid_mode { "UID FETCH" } else { "FETCH" };
    if args.len() < 2 {
        let resp = format!("{tag} BAD Invalid {command_name} command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let set_raw = &args[0];
    let items_raw = args[1..].join(" ");

    let folder = ctx.store.folder(user, Some(&selected.folder));
    let pairs = match folder.uid_key_pairs().await {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!("{command_name} cannot enumerate folder: {e}");
            let resp = format!("{tag} NO [SERVERFAILURE] Server error\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    };

    let items = fetch::expand_macros(fetch::parse_items(&items_raw));
    if items.is_empty() {
        let resp = format!("{tag} BAD Invalid fetch items\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let mark_seen = !selected.read_only && items.iter().any(|item| fetch::item_sets_seen(item));

    // (sequence, uid, key) triples, in UID order.
    let targets: Vec<(usize, u32, String)> = if uid_mode {
        let max_uid = pairs.last().map_or(0, |(uid, _)| *uid);
        let set = match UidSet::parse(set_raw, max_uid) {
            Ok(set) => set,
            Err(reason) => {
                let resp = format!("{tag} BAD {reason}\r\n");
                let _ = write_line(stream, &resp).await;
                return;
            }
        };
        pairs
            .iter()
            .enumerate()
            .filter(|(_, (uid, _))| set.contains(*uid))
            .map(|(index, (uid, key))| (index + 1, *uid, key.clone()))
            .collect()
    } else {
        match parse_sequence_set(set_raw, pairs.len()) {
            Ok(sequences) => sequences
                .into_iter()
                .map(|seq| {
                    let (uid, key) = &pairs[seq - 1];
                    (seq, *uid, key.clone())
                })
                .collect(),
            Err(reason) => {
                let resp = format!("{tag} BAD {reason}\r\n");
                let _ = write_line(stream, &resp).await;
                return;
            }
        }
    };

    for (seq, uid, key) in targets {
        let message = match folder.load_by_key(key.clone(), mark_seen).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!("{command_name} skipping seq={seq} uid={uid}: {e}");
                continue;
            }
        };
        let Some(response) = render_message(seq, uid, &items, uid_mode, &message) else {
            continue;
        };
        if write_bytes(stream, &response).await.is_err() {
            return;
        }
    }

    let resp = format!("{tag} OK {command_name} completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Build the `* <seq> FETCH (...)` line for one message, or `None`
/// when nothing was renderable.
fn render_message(
    seq: usize,
    uid: u32,
    items: &[String],
    uid_mode: bool,
    message: &StoredMessage,
) -> Option<Vec<u8>> {
    let parsed = match mailparse::parse_mail(&message.raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("skipping unparseable message {}: {e}", message.key);
            return None;
        }
    };

    let mut fragments: Vec<(String, FetchValue)> = Vec::new();
    for item in items {
        match fetch::format_item(item, message, &parsed) {
            Ok(Some(fragment)) => fragments.push(fragment),
            Ok(None) => {}
            Err(e) => warn!("error formatting item {item}: {e}"),
        }
    }
    if fragments.is_empty() {
        return None;
    }
    if uid_mode && !fragments.iter().any(|(name, _)| name.eq_ignore_ascii_case("UID")) {
        fragments.insert(0, ("UID".to_string(), FetchValue::Number(u64::from(uid))));
    }

    let mut out = format!("* {seq} FETCH (").into_bytes();
    for (i, (name, value)) in fragments.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(name.as_bytes());
        out.push(b' ');
        value.write_to(&mut out);
    }
    out.extend_from_slice(b")\r\n");
    Some(out)
}
