//! LIST and LSUB command handlers.
//!
//! The folder model is flat with `/` as the hierarchy separator. A
//! pattern ending in `*` or `%` matches every folder whose name starts
//! with the prefix before the wildcard (the two wildcards behave the
//! same here); an empty pattern names the `\Noselect` root; anything
//! else is an exact match. LSUB mirrors LIST -- every folder counts as
//! subscribed.

use crate::imap::io::write_line;
use crate::imap::session::ImapContext;
use crate::store::Folder;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Handle the LIST command (or LSUB when `lsub` is set).
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    lsub: bool,
    ctx: &ImapContext,
    user: &str,
    stream: &mut BufReader<S>,
) {
    let word = if lsub { "LSUB" } else { "LIST" };
    if args.len() != 2 {
        let resp = format!("{tag} BAD Invalid {word} command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let (reference, pattern) = (&args[0], &args[1]);

    if reference.contains("..") || pattern.contains("..") {
        let resp = format!("{tag} NO Invalid reference name\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    if pattern.is_empty() {
        let line = format!("* {word} (\\Noselect) \"/\" \"\"\r\n");
        if write_line(stream, &line).await.is_err() {
            return;
        }
        let resp = format!("{tag} OK {word} completed\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let search_pattern = if let Some(absolute) = pattern.strip_prefix('/') {
        absolute.to_string()
    } else {
        format!("{reference}{pattern}")
    };
    let search_pattern = search_pattern.trim_start_matches('/');

    if search_pattern.ends_with('*') || search_pattern.ends_with('%') {
        let prefix = &search_pattern[..search_pattern.len() - 1];
        let root = ctx.store.folder(user, None);

        if !root.exists().await {
            let resp = format!("{tag} NO [NONEXISTENT] Not a mailbox directory\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }

        if "INBOX".starts_with(prefix)
            && emit_entry(word, "INBOX", &root, stream).await.is_err()
        {
            return;
        }

        let names = match root.list_folders().await {
            Ok(names) => names,
            Err(e) => {
                warn!("{word} folder enumeration failed: {e}");
                Vec::new()
            }
        };
        for name in names {
            if !name.starts_with(prefix) {
                continue;
            }
            let folder = ctx.store.folder(user, Some(&name));
            if emit_entry(word, &name, &folder, stream).await.is_err() {
                return;
            }
        }
    } else {
        let folder = ctx.store.folder(user, Some(search_pattern));
        if folder.exists().await
            && emit_entry(word, search_pattern, &folder, stream)
                .await
                .is_err()
        {
            return;
        }
    }

    let resp = format!("{tag} OK {word} completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Write one `* LIST (attrs) "/" "name"` line. A folder that vanished
/// between enumeration and inspection is skipped, not fatal.
async fn emit_entry<S: AsyncRead + AsyncWrite + Unpin>(
    word: &str,
    name: &str,
    folder: &Folder,
    stream: &mut BufReader<S>,
) -> std::io::Result<()> {
    match folder.attributes().await {
        Ok(attributes) => {
            let line = format!(
                "* {word} ({}) \"/\" \"{name}\"\r\n",
                attributes.join(" ")
            );
            write_line(stream, &line).await
        }
        Err(e) => {
            warn!("skipping {name} in {word}: {e}");
            Ok(())
        }
    }
}
