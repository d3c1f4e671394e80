//! STORE and UID STORE command handlers.
//!
//! Replaces, adds, or removes persistent flags:
//!
//! - `FLAGS (...)` -- replace the flag set
//! - `+FLAGS (...)` -- add flags
//! - `-FLAGS (...)` -- remove flags
//!
//! Each form has a `.SILENT` variant that suppresses the per-message
//! `* N FETCH (FLAGS ...)` echoes. Read-only sessions (EXAMINE) are
//! refused. `\Recent` carries no Maildir letter and is ignored in the
//! requested flag list.

use crate::flag::{atoms_to_letters, letters_to_atoms, normalize_letters};
use crate::imap::io::write_line;
use crate::imap::sequence::{parse_sequence_set, UidSet};
use crate::imap::session::{ImapContext, Selected};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

enum StoreOp {
    Replace,
    Add,
    Remove,
}

/// Handle STORE (or UID STORE when `uid_mode` is set).
#[allow(clippy::too_many_lines)]
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    uid_mode: bool,
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    stream: &mut BufReader<S>,
) {
    let command_name = if uid_mode { "UID STORE" } else { "STORE" };
    if selected.read_only {
        let resp = format!("{tag} NO [READ-ONLY] Mailbox is read-only\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    if args.len() < 3 {
        let resp = format!("{tag} BAD Invalid {command_name} command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let set_raw = &args[0];
    let item = args[1].to_ascii_uppercase();
    let silent = item.ends_with(".SILENT");
    let op = match item.trim_end_matches(".SILENT") {
        "FLAGS" => StoreOp::Replace,
        "+FLAGS" => StoreOp::Add,
        "-FLAGS" => StoreOp::Remove,
        _ => {
            let resp = format!("{tag} BAD Invalid STORE data item\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    };

    let flags_raw = args[2..].join(" ");
    let flags_raw = flags_raw.trim_start_matches('(').trim_end_matches(')');
    let change = atoms_to_letters(flags_raw.split_whitespace());

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
        let Ok(Some((current, _))) = folder.message_flags(key.clone()).await else {
            continue;
        };

        let updated = match op {
            StoreOp::Replace => change.clone(),
            StoreOp::Add => normalize_letters(&format!("{current}{change}")),
            StoreOp::Remove => current
                .chars()
                .filter(|letter| !change.contains(*letter))
                .collect(),
        };

        match folder.set_flags(key.clone(), updated.clone()).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("{command_name} skipping seq={seq}: {e}");
                continue;
            }
        }

        if !silent {
            let (flags_now, recent) = folder
                .message_flags(key)
                .await
                .ok()
                .flatten()
                .unwrap_or((updated, false));
            let atoms = letters_to_atoms(&flags_now, recent).join(" ");
            let line = if uid_mode {
                format!("* {seq} FETCH (UID {uid} FLAGS ({atoms}))\r\n")
            } else {
                format!("* {seq} FETCH (FLAGS ({atoms}))\r\n")
            };
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK {command_name} completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::store::Store;
    use std::sync::Arc;

    const RAW: &[u8] = b"From: a@x.org\r\n\r\nbody\r\n";

    fn context(dir: &std::path::Path) -> ImapContext {
        ImapContext {
            store: Store::new(dir, "localhost"),
            auth: Arc::new(StaticAuthenticator::default()),
            host_name: "localhost".to_string(),
        }
    }

    fn writable() -> Selected {
        Selected {
            folder: "INBOX".to_string(),
            read_only: false,
        }
    }

    async fn run(
        tag: &str,
        args: &[&str],
        uid_mode: bool,
        selected: &Selected,
        ctx: &ImapContext,
    ) -> String {
        let (client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();

        handle(tag, &args, uid_mode, ctx, "alice", selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn populated(dir: &std::path::Path) -> ImapContext {
        let ctx = context(dir);
        let folder = ctx.store.folder("alice", None);
        folder.create().await.unwrap();
        folder.save(RAW.to_vec()).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn add_seen_reports_new_flags() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;

        let output = run("A1", &["1", "+FLAGS", "(\\Seen)"], false, &writable(), &ctx).await;
        assert!(output.contains("* 1 FETCH (FLAGS (\\Seen))"));
        assert!(output.contains("A1 OK STORE completed"));
    }

    #[tokio::test]
    async fn double_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;

        let first = run("A1", &["1", "FLAGS", "(\\Seen)"], false, &writable(), &ctx).await;
        let second = run("A2", &["1", "FLAGS", "(\\Seen)"], false, &writable(), &ctx).await;
        assert!(first.contains("FLAGS (\\Seen)"));
        assert!(second.contains("FLAGS (\\Seen)"));

        let flags = ctx
            .store
            .folder("alice", None)
            .load_by_uid(1, false)
            .await
            .unwrap()
            .unwrap()
            .flags;
        assert_eq!(flags, "S");
    }

    #[tokio::test]
    async fn remove_flag() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;
        run("A1", &["1", "FLAGS", "(\\Seen", "\\Flagged)"], false, &writable(), &ctx).await;

        let output =
            run("A2", &["1", "-FLAGS", "(\\Seen)"], false, &writable(), &ctx).await;
        assert!(output.contains("FLAGS (\\Flagged)"));
    }

    #[tokio::test]
    async fn silent_store_suppresses_fetch_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;

        let output = run(
            "A1",
            &["1", "+FLAGS.SILENT", "(\\Deleted)"],
            false,
            &writable(),
            &ctx,
        )
        .await;
        assert!(!output.contains("FETCH"));
        assert!(output.contains("A1 OK STORE completed"));
    }

    #[tokio::test]
    async fn uid_store_echoes_uid() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;

        let output = run("A1", &["1", "+FLAGS", "(\\Seen)"], true, &writable(), &ctx).await;
        assert!(output.contains("* 1 FETCH (UID 1 FLAGS (\\Seen))"));
        assert!(output.contains("A1 OK UID STORE completed"));
    }

    #[tokio::test]
    async fn read_only_session_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;
        let examined = Selected {
            folder: "INBOX".to_string(),
            read_only: true,
        };

        let output = run("A1", &["1", "+FLAGS", "(\\Seen)"], false, &examined, &ctx).await;
        assert!(output.contains("A1 NO [READ-ONLY]"));
    }

    #[tokio::test]
    async fn unknown_data_item_is_bad() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = populated(dir.path()).await;
        let output = run("A1", &["1", "LABELS", "(x)"], false, &writable(), &ctx).await;
        assert!(output.contains("A1 BAD Invalid STORE data item"));
    }
}
