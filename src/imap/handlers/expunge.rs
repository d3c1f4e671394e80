//! EXPUNGE and CLOSE command handlers.
//!
//! EXPUNGE permanently removes every message carrying `\Deleted` and
//! reports each removal as `* N EXPUNGE`. The responses are emitted in
//! descending sequence order, so each reported number is valid against
//! the numbering the client currently holds. CLOSE does the same
//! silently (unless the session is read-only) and returns the session
//! to the authenticated state.

use crate::error::Result;
use crate::imap::io::write_line;
use crate::imap::session::{ImapContext, Selected, Session};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Handle the EXPUNGE command.
pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    stream: &mut BufReader<S>,
) {
    if selected.read_only {
        let resp = format!("{tag} NO [READ-ONLY] Mailbox is read-only\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    match expunge_deleted(ctx, user, selected).await {
        Ok(removed) => {
            for seq in removed {
                if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
                    return;
                }
            }
            let resp = format!("{tag} OK EXPUNGE completed\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Err(e) => {
            warn!("EXPUNGE failed: {e}");
            let resp = format!("{tag} NO [SERVERFAILURE] Server error\r\n");
            let _ = write_line(stream, &resp).await;
        }
    }
}

/// Handle the CLOSE command: silent expunge, then deselect.
pub async fn handle_close<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
    session: &mut Session,
    stream: &mut BufReader<S>,
) {
    if !selected.read_only {
        if let Err(e) = expunge_deleted(ctx, user, selected).await {
            warn!("CLOSE expunge failed: {e}");
        }
    }
    session.selected = None;
    let resp = format!("{tag} OK CLOSE completed, now in authenticated state\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Remove `\Deleted` messages; returns their sequence numbers in
/// descending order.
async fn expunge_deleted(
    ctx: &ImapContext,
    user: &str,
    selected: &Selected,
) -> Result<Vec<usize>> {
    let folder = ctx.store.folder(user, Some(&selected.folder));
    let pairs = folder.uid_key_pairs().await?;

    let mut doomed: Vec<(usize, String)> = Vec::new();
    for (index, (_, key)) in pairs.iter().enumerate() {
        if let Some((flags, _)) = folder.message_flags(key.clone()).await? {
            if flags.contains('T') {
                doomed.push((index + 1, key.clone()));
            }
        }
    }

    let mut removed = Vec::new();
    for (seq, key) in doomed.into_iter().rev() {
        folder.delete_message(key).await?;
        removed.push(seq);
    }
    Ok(removed)
}
