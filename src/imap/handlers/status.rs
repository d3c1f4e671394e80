//! STATUS command handler.
//!
//! Reports the requested subset of `MESSAGES RECENT UIDNEXT
//! UIDVALIDITY UNSEEN` for a folder without selecting it.

use crate::error::{Error, Result};
use crate::imap::io::write_line;
use crate::imap::session::ImapContext;
use crate::store::Folder;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

/// Handle the STATUS command.
pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &[String],
    ctx: &ImapContext,
    user: &str,
    stream: &mut BufReader<S>,
) {
    if args.len() < 2 {
        let resp = format!("{tag} BAD Invalid STATUS command format\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }
    let mailbox_name = &args[0];
    let items_raw = args[1..].join(" ");
    let items_raw = items_raw
        .trim_start_matches('(')
        .trim_end_matches(')')
        .to_string();

    let folder = ctx.store.folder(user, Some(mailbox_name));
    if mailbox_name.contains("..") || !folder.exists().await {
        let resp = format!("{tag} NO [NONEXISTENT] Mailbox does not exist\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    match gather(&folder, &items_raw).await {
        Ok(parts) => {
            let line = format!("* STATUS {mailbox_name} ({})\r\n", parts.join(" "));
            if write_line(stream, &line).await.is_err() {
                return;
            }
            let resp = format!("{tag} OK STATUS completed\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Err(Error::Protocol(item)) => {
            let resp = format!("{tag} BAD Unknown STATUS item '{item}'\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Err(e) => {
            warn!("STATUS {mailbox_name} failed: {e}");
            let resp = format!("{tag} NO [SERVERFAILURE] Server error\r\n");
            let _ = write_line(stream, &resp).await;
        }
    }
}

async fn gather(folder: &Folder, items_raw: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for item in items_raw.split_whitespace() {
        match item.to_ascii_uppercase().as_str() {
            "MESSAGES" => parts.push(format!("MESSAGES {}", folder.message_count().await?)),
            "RECENT" => parts.push(format!("RECENT {}", folder.recent_count().await?)),
            "UIDNEXT" => parts.push(format!("UIDNEXT {}", folder.uidnext().await?)),
            "UIDVALIDITY" => {
                parts.push(format!("UIDVALIDITY {}", folder.uidvalidity().await?));
            }
            "UNSEEN" => parts.push(format!("UNSEEN {}", folder.unseen_count().await?)),
            other => return Err(Error::Protocol(other.to_string())),
        }
    }
    Ok(parts)
}
